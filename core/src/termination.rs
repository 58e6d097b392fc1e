//! # Early Search Termination
//!
//! Search routines return [`SearchResult`], which either carries a value or a
//! [`Termination`] describing why the search stopped before exhausting the
//! Pareto front. Terminations are not failures: the driver freezes whatever
//! archive it holds and returns it to the caller.

use std::fmt;

/// Reasons for a search call to return before the front is exhausted
#[derive(Debug)]
pub enum Termination {
    /// The global wall-clock deadline was reached
    Deadline,
    /// An external interrupt (e.g., SIGINT) was observed
    Interrupted,
    /// An error occurred in the oracle or a logger
    Error(anyhow::Error),
}

impl Termination {
    /// Whether the termination still permits reporting partial results
    pub fn is_benign(&self) -> bool {
        !matches!(self, Termination::Error(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Deadline => {
                write!(f, "search terminated early because the time limit was reached")
            }
            Termination::Interrupted => {
                write!(f, "search terminated early because of an interrupt signal")
            }
            Termination::Error(err) => write!(f, "search failed: {err}"),
        }
    }
}

impl From<anyhow::Error> for Termination {
    fn from(err: anyhow::Error) -> Self {
        Termination::Error(err)
    }
}

impl From<rustsat::OutOfMemory> for Termination {
    fn from(err: rustsat::OutOfMemory) -> Self {
        Termination::Error(err.into())
    }
}

impl From<rustsat::encodings::Error> for Termination {
    fn from(err: rustsat::encodings::Error) -> Self {
        Termination::Error(err.into())
    }
}

/// Return type of search routines that can be terminated early
pub type SearchResult<T = ()> = Result<T, Termination>;
