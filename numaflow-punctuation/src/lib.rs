//! Punctuations are periodic callbacks a processing node registers to run as time passes, e.g. to
//! flush buffered state or close windows. Time is tracked in two domains which advance
//! independently: event time, carried by the records flowing through the vertex, and wall-clock
//! time of the host. Event time stops moving when the input stops, so a punctuation can also fall
//! due on the wall clock (hybrid punctuation) to guarantee progress.
//!
//! The [PunctuationScheduler] is owned by a task. The task registers [Schedule]s and calls
//! [PunctuationScheduler::advance] with its current event time after every record or poll tick;
//! due schedules are handed to the [Punctuator] and rearmed.

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::PunctuationConfig;
pub use crate::error::{Error, Result};
pub use crate::punctuator::Punctuator;
pub use crate::schedule::{Cancellable, Schedule};
pub use crate::scheduler::PunctuationScheduler;

mod error;

/// Construction-time configuration of the scheduler.
mod config;

/// Wall-clock sources for the hybrid punctuation rule.
mod clock;

/// [Schedule] is one pending punctuation and knows how to produce its successor.
mod schedule;

mod punctuator;

/// Ordered queue of schedules and the dual-clock firing policy.
mod scheduler;
