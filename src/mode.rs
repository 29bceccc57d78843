// INSPECTOR-BENCH LIBRARY MODES
// FOUR CONFIGURATIONS: TRACE CAPTURE x THREADING-LIBRARY INTERCEPTION

use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum LibraryMode {
    Pthread,
    Tthread,
    Pt,
    Inspector,
}

pub const ALL_MODES: [LibraryMode; 4] = [
    LibraryMode::Pthread,
    LibraryMode::Tthread,
    LibraryMode::Pt,
    LibraryMode::Inspector,
];

// UNINSTRUMENTED MODE EVERY RATIO IS TAKEN AGAINST
pub const BASELINE: LibraryMode = LibraryMode::Pthread;

impl LibraryMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pthread => "pthread",
            Self::Tthread => "tthread",
            Self::Pt => "pt",
            Self::Inspector => "inspector",
        }
    }

    pub fn trace_capture(self) -> bool {
        matches!(self, Self::Pt | Self::Inspector)
    }

    pub fn interpose(self) -> bool {
        matches!(self, Self::Tthread | Self::Inspector)
    }

    pub fn from_flags(trace_capture: bool, interpose: bool) -> Self {
        match (trace_capture, interpose) {
            (false, false) => Self::Pthread,
            (false, true) => Self::Tthread,
            (true, false) => Self::Pt,
            (true, true) => Self::Inspector,
        }
    }
}

impl fmt::Display for LibraryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LibraryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_MODES
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown library mode `{}` (expected pthread, tthread, pt, inspector)", s))
    }
}
