//! The punctuation scheduler keeps one live [Schedule] per registered punctuation, ordered by event
//! time deadline, and fires them as the owning task advances.
//!
//! > When is a schedule due?
//!
//! Either event time has caught up with its deadline, or (with hybrid punctuation enabled) more
//! than one interval of wall-clock time has passed since it was armed. The second rule keeps
//! punctuations firing when the input stalls and event time stops moving.
//!
//! > What timestamp does the punctuator see?
//!
//! Under the event-time rule, the current event time. Under the wall-clock rule, the schedule's
//! next deadline (`event_deadline + interval`). Punctuators always get an event-time value.
//!
//! All operations serialize on one lock, which is also held while the punctuator runs.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::PunctuationConfig;
use crate::error::Result;
use crate::punctuator::Punctuator;
use crate::schedule::{Cancellable, Schedule, validate_interval};

/// Pending schedules and the sequence handed to the next registration.
struct ScheduleQueue<N> {
    pending: BTreeSet<Schedule<N>>,
    next_sequence: u64,
}

/// Why the head of the queue was popped.
enum Firing {
    /// Event time reached the deadline; fire with the current event time.
    EventTime(DateTime<Utc>),
    /// Wall-clock interval elapsed while event time lagged; fire with the next deadline.
    WallClock(DateTime<Utc>),
    /// The punctuation was cancelled through its handle.
    Cancelled,
}

/// PunctuationScheduler fires periodic callbacks for the processing nodes of a task on event time,
/// falling back to the wall clock when event time stalls.
pub struct PunctuationScheduler<N, C = SystemClock> {
    queue: Mutex<ScheduleQueue<N>>,
    config: PunctuationConfig,
    clock: C,
}

impl<N: Clone> PunctuationScheduler<N, SystemClock> {
    /// Creates a scheduler reading wall-clock time from the host clock.
    pub fn new(config: PunctuationConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<N: Clone, C: Clock> PunctuationScheduler<N, C> {
    pub fn with_clock(config: PunctuationConfig, clock: C) -> Self {
        info!(
            hybrid_punctuate = config.hybrid_punctuate,
            "Punctuation scheduler created"
        );
        Self {
            queue: Mutex::new(ScheduleQueue {
                pending: BTreeSet::new(),
                next_sequence: 0,
            }),
            config,
            clock,
        }
    }

    pub fn is_hybrid_enabled(&self) -> bool {
        self.config.hybrid_punctuate
    }

    /// Registers a punctuation. No deduplication is done, registering the same punctuation twice
    /// makes it fire twice per period. Returns the handle to cancel it.
    pub fn register(&self, mut schedule: Schedule<N>) -> Result<Cancellable> {
        validate_interval(schedule.interval())?;

        let mut queue = self.queue.lock();
        schedule.sequence = queue.next_sequence;
        queue.next_sequence += 1;

        debug!(
            sequence = schedule.sequence,
            event_deadline = %schedule.event_deadline(),
            armed_at = %schedule.armed_at(),
            interval_ms = schedule.interval().as_millis(),
            "Registered punctuation"
        );

        let handle = schedule.cancellable().clone();
        queue.pending.insert(schedule);
        Ok(handle)
    }

    /// Cancels a single punctuation and removes it from the queue. Returns false if it was no
    /// longer pending.
    pub fn cancel(&self, handle: &Cancellable) -> bool {
        handle.cancel();
        let mut queue = self.queue.lock();
        let before = queue.pending.len();
        queue
            .pending
            .retain(|schedule| !schedule.cancellable().same_as(handle));
        before != queue.pending.len()
    }

    /// Removes every schedule owned by `node`, typically when the node is torn down. Returns the
    /// number of schedules removed.
    pub fn cancel_node(&self, node: &N) -> usize
    where
        N: PartialEq,
    {
        let mut queue = self.queue.lock();
        let before = queue.pending.len();
        queue.pending.retain(|schedule| schedule.node() != node);
        let removed = before - queue.pending.len();
        debug!(removed, "Cancelled punctuations of node");
        removed
    }

    /// Removes all pending schedules.
    pub fn cancel_all(&self) {
        let mut queue = self.queue.lock();
        let cleared = queue.pending.len();
        queue.pending.clear();
        info!(cleared, "Cancelled all punctuations");
    }

    /// Number of live (not cancelled) schedules.
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .pending
            .iter()
            .filter(|schedule| !schedule.is_cancelled())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest event-time deadline among live schedules.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue
            .lock()
            .pending
            .iter()
            .find(|schedule| !schedule.is_cancelled())
            .map(Schedule::event_deadline)
    }

    /// Fires every schedule that is due at `event_time`, earliest deadline first, and returns
    /// whether anything fired.
    ///
    /// Each fired schedule is replaced by its successor before the punctuator is invoked, so if the
    /// punctuator fails the error is returned with the queue intact: the failed slot is rearmed and
    /// the schedules not yet examined stay pending.
    pub fn advance<P>(&self, event_time: DateTime<Utc>, punctuator: &mut P) -> Result<bool>
    where
        P: Punctuator<N> + ?Sized,
    {
        let mut queue = self.queue.lock();
        let now = self.clock.now();
        let mut punctuated = false;

        loop {
            let firing = match queue.pending.first() {
                None => break,
                Some(top) => match self.firing(top, event_time, now) {
                    Some(firing) => firing,
                    None => break,
                },
            };

            let Some(fired) = queue.pending.pop_first() else {
                break;
            };

            let timestamp = match firing {
                Firing::EventTime(timestamp) => timestamp,
                Firing::WallClock(timestamp) => {
                    debug!(
                        sequence = fired.sequence,
                        event_deadline = %fired.event_deadline(),
                        %event_time,
                        %now,
                        "Event time stalled, punctuating on wall clock"
                    );
                    timestamp
                }
                Firing::Cancelled => {
                    // other handles may have been cancelled too, purge them in one pass
                    queue.pending.retain(|schedule| !schedule.is_cancelled());
                    debug!(sequence = fired.sequence, "Dropped cancelled punctuations");
                    continue;
                }
            };

            queue.pending.insert(fired.successor(event_time, now));
            punctuated = true;

            if let Err(e) = punctuator.punctuate(fired.node(), timestamp) {
                warn!(
                    sequence = fired.sequence,
                    %timestamp,
                    error = %e,
                    "Punctuator failed"
                );
                return Err(e);
            }
        }

        Ok(punctuated)
    }

    fn firing(
        &self,
        schedule: &Schedule<N>,
        event_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Firing> {
        if schedule.is_cancelled() {
            Some(Firing::Cancelled)
        } else if schedule.event_deadline() <= event_time {
            Some(Firing::EventTime(event_time))
        } else if self.config.hybrid_punctuate && schedule.is_wall_clock_due(now) {
            Some(Firing::WallClock(schedule.next_event_deadline()))
        } else {
            None
        }
    }
}
