// INSPECTOR-BENCH TWO-PARTY RENDEZVOUS
// SAMPLER SIDE AND LAUNCHER SIDE BOTH BLOCK UNTIL BOTH HAVE ARRIVED.
// UNLIKE std::sync::Barrier, EITHER SIDE MAY ABORT INSTEAD OF ARRIVING, WHICH
// WAKES THE OTHER WITH A FAILURE SO A DEAD SAMPLER NEVER STRANDS THE LAUNCHER.

use std::sync::{Condvar, Mutex};

pub trait Rendezvous: Sync {
    // TRUE WHEN BOTH PARTIES ARRIVED, FALSE IF THE RENDEZVOUS WAS ABORTED
    fn wait(&self) -> bool;

    fn abort(&self);
}

#[derive(Default)]
struct State {
    arrived: u8,
    aborted: bool,
}

#[derive(Default)]
pub struct TwoPartyBarrier {
    state: Mutex<State>,
    cv: Condvar,
}

impl TwoPartyBarrier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Rendezvous for TwoPartyBarrier {
    fn wait(&self) -> bool {
        let mut st = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if st.aborted {
            return false;
        }
        st.arrived += 1;
        if st.arrived >= 2 {
            self.cv.notify_all();
            return true;
        }
        while st.arrived < 2 && !st.aborted {
            st = match self.cv.wait(st) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        st.arrived >= 2
    }

    fn abort(&self) {
        let mut st = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if st.arrived < 2 {
            st.aborted = true;
        }
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn both_parties_released_together() {
        let b = TwoPartyBarrier::new();
        let first_done = AtomicBool::new(false);
        std::thread::scope(|s| {
            let h = s.spawn(|| {
                let ok = b.wait();
                first_done.store(true, Ordering::SeqCst);
                ok
            });
            std::thread::sleep(Duration::from_millis(50));
            // FIRST PARTY MUST STILL BE BLOCKED
            assert!(!first_done.load(Ordering::SeqCst));
            assert!(b.wait());
            assert!(h.join().unwrap());
        });
    }

    #[test]
    fn abort_wakes_waiter() {
        let b = TwoPartyBarrier::new();
        std::thread::scope(|s| {
            let h = s.spawn(|| b.wait());
            std::thread::sleep(Duration::from_millis(20));
            b.abort();
            assert!(!h.join().unwrap());
        });
        // LATE ARRIVALS SEE THE ABORT TOO
        assert!(!b.wait());
    }

    #[test]
    fn abort_after_release_is_harmless() {
        let b = TwoPartyBarrier::new();
        std::thread::scope(|s| {
            let h = s.spawn(|| b.wait());
            assert!(b.wait());
            assert!(h.join().unwrap());
        });
        b.abort();
    }
}
