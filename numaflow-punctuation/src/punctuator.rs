use chrono::{DateTime, Utc};

use crate::error::Result;

/// Callback invoked when a schedule becomes due. It receives the node the schedule was registered
/// for and an event-time timestamp, never a wall-clock reading.
///
/// The punctuator runs while the scheduler lock is held: it must be quick and it must not call
/// back into the same [crate::PunctuationScheduler], the lock is not reentrant and the call would
/// deadlock.
pub trait Punctuator<N> {
    fn punctuate(&mut self, node: &N, timestamp: DateTime<Utc>) -> Result<()>;
}

impl<N, F> Punctuator<N> for F
where
    F: FnMut(&N, DateTime<Utc>) -> Result<()>,
{
    fn punctuate(&mut self, node: &N, timestamp: DateTime<Utc>) -> Result<()> {
        self(node, timestamp)
    }
}
