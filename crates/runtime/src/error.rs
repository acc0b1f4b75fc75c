use std::error::Error;
use std::fmt;

/// Returned when an event is posted to a loop that has stopped.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LoopClosedError;

impl fmt::Debug for LoopClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopClosedError").finish()
    }
}

impl fmt::Display for LoopClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "the event loop has stopped".fmt(f)
    }
}

impl Error for LoopClosedError {}
