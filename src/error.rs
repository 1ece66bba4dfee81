//! Error types shared by every phase of a counting run.

use std::fmt;

use crate::address::FormatError;

/// Phase of a counting run, reported alongside a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Splitting the input into line-aligned chunks.
    Plan,
    /// Workers reading chunks and recording addresses.
    Fill,
    /// Exact reduction over the bitset.
    Count,
    /// Approximate reduction over HyperLogLog registers.
    Estimate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Plan => "plan",
            Phase::Fill => "fill",
            Phase::Count => "count",
            Phase::Estimate => "estimate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed line at byte {offset}: {source}")]
    Format {
        offset: u64,
        #[source]
        source: FormatError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("{phase} phase failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Tag an error with the phase it happened in. Already tagged errors keep
    /// their first phase.
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            err @ Error::Phase { .. } => err,
            err => Error::Phase {
                phase,
                source: Box::new(err),
            },
        }
    }

    /// Phase the error was raised in, if it has been tagged.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

macro_rules! config_err {
    ($($arg:tt)*) => {
        crate::error::Error::Config(std::format!($($arg)*))
    };
}
pub(crate) use config_err;
