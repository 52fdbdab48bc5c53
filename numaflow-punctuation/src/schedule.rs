use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{Error, Result};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Handle to cancel one registered punctuation. It is shared by the registered [Schedule] and every
/// successor it is replaced with, so cancelling it stops the punctuation no matter how many times
/// it has already fired.
#[derive(Debug, Clone, Default)]
pub struct Cancellable {
    cancelled: Arc<AtomicBool>,
}

impl Cancellable {
    /// Marks the punctuation as cancelled. It never fires again, but it is only removed from the
    /// queue once `advance` reaches it; use [crate::PunctuationScheduler::cancel] to remove it
    /// right away.
    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Returns true if both handles belong to the same punctuation.
    pub(crate) fn same_as(&self, other: &Cancellable) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

/// One pending punctuation. A Schedule is never mutated after registration; when it fires it is
/// replaced by its [Schedule::successor].
#[derive(Debug, Clone)]
pub struct Schedule<N> {
    /// Processing node the punctuation is delivered to.
    node: N,
    /// Event time at which the schedule is due under the event-time rule.
    event_deadline: DateTime<Utc>,
    /// Wall-clock time at which this instance was created (registration or rearm).
    armed_at: DateTime<Utc>,
    /// Period between firings, in both time domains.
    interval: Duration,
    /// Registration order, used to break ties between equal deadlines. Assigned by the scheduler.
    pub(crate) sequence: u64,
    cancellable: Cancellable,
}

impl<N> Schedule<N> {
    pub fn new(
        node: N,
        event_deadline: DateTime<Utc>,
        armed_at: DateTime<Utc>,
        interval: Duration,
    ) -> Self {
        Self {
            node,
            event_deadline,
            armed_at,
            interval,
            sequence: 0,
            cancellable: Cancellable::default(),
        }
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn event_deadline(&self) -> DateTime<Utc> {
        self.event_deadline
    }

    pub fn armed_at(&self) -> DateTime<Utc> {
        self.armed_at
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellable.is_cancelled()
    }

    pub(crate) fn cancellable(&self) -> &Cancellable {
        &self.cancellable
    }

    /// Interval as a chrono delta. The interval has been validated at registration, the fallback
    /// only matters for schedules that never went through a scheduler.
    fn interval_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.interval).unwrap_or(TimeDelta::MAX)
    }

    /// The deadline one interval after the current one.
    pub fn next_event_deadline(&self) -> DateTime<Utc> {
        self.event_deadline
            .checked_add_signed(self.interval_delta())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns true if, at wall-clock time `now`, more than one interval has passed since this
    /// schedule was armed.
    pub fn is_wall_clock_due(&self, now: DateTime<Utc>) -> bool {
        self.armed_at
            .checked_add_signed(self.interval_delta())
            .is_some_and(|due| due < now)
    }

    /// Creates the schedule replacing this one after it fired at `current_event_time`. The next
    /// deadline is one interval later, unless event time already moved past it; then the deadline
    /// skips to the first interval boundary after `current_event_time` so the missed periods are
    /// not fired back to back.
    pub fn successor(&self, current_event_time: DateTime<Utc>, now: DateTime<Utc>) -> Schedule<N>
    where
        N: Clone,
    {
        let next_deadline = self.next_event_deadline();
        let event_deadline = if current_event_time >= next_deadline {
            let interval_ns = self.interval.as_nanos().max(1);
            let behind_ns = (current_event_time - self.event_deadline)
                .to_std()
                .map(|behind| behind.as_nanos())
                .unwrap_or(0);
            let periods = behind_ns / interval_ns + 1;
            periods
                .checked_mul(interval_ns)
                .and_then(|skip_ns| {
                    let secs = i64::try_from(skip_ns / NANOS_PER_SEC).ok()?;
                    let nanos = u32::try_from(skip_ns % NANOS_PER_SEC).ok()?;
                    TimeDelta::new(secs, nanos)
                })
                .and_then(|skip| self.event_deadline.checked_add_signed(skip))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        } else {
            next_deadline
        };

        Schedule {
            node: self.node.clone(),
            event_deadline,
            armed_at: now,
            interval: self.interval,
            sequence: self.sequence,
            cancellable: self.cancellable.clone(),
        }
    }
}

/// Rejects intervals the scheduler cannot rearm with: zero, below 1ms, or too large to be added to
/// a timestamp.
pub(crate) fn validate_interval(interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(Error::InvalidInterval("interval must be positive".to_string()));
    }
    if interval < Duration::from_millis(1) {
        return Err(Error::InvalidInterval(format!("interval {interval:?} is below 1ms")));
    }
    TimeDelta::from_std(interval)
        .map(|_| ())
        .map_err(|e| Error::InvalidInterval(format!("interval {interval:?} is too large: {e}")))
}

// Ordered by deadline, then registration order, so a BTreeSet pops the earliest-due schedule first.
impl<N> Ord for Schedule<N> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.event_deadline
            .cmp(&other.event_deadline)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl<N> PartialOrd for Schedule<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<N> PartialEq for Schedule<N> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<N> Eq for Schedule<N> {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn ts(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn test_successor_advances_by_interval() {
        let schedule = Schedule::new("node", ts(100), ts(0), Duration::from_millis(50));
        let next = schedule.successor(ts(100), ts(7));

        assert_eq!(next.event_deadline(), ts(150));
        assert_eq!(next.armed_at(), ts(7));
        assert_eq!(next.interval(), Duration::from_millis(50));
        assert_eq!(*next.node(), "node");
    }

    #[test]
    fn test_successor_skips_missed_periods() {
        let schedule = Schedule::new("node", ts(100), ts(0), Duration::from_millis(50));

        // event time landed exactly on the next deadline
        assert_eq!(schedule.successor(ts(150), ts(0)).event_deadline(), ts(200));

        // event time jumped several periods ahead
        assert_eq!(schedule.successor(ts(1000), ts(0)).event_deadline(), ts(1050));
        assert_eq!(schedule.successor(ts(1010), ts(0)).event_deadline(), ts(1050));
    }

    #[test]
    fn test_successor_skip_keeps_sub_millisecond_grid() {
        let micros = |us: i64| DateTime::from_timestamp_micros(us).unwrap();
        let schedule = Schedule::new("node", micros(0), micros(0), Duration::from_micros(1500));

        assert_eq!(schedule.successor(micros(0), micros(0)).event_deadline(), micros(1500));
        assert_eq!(schedule.successor(micros(3000), micros(0)).event_deadline(), micros(4500));
        assert_eq!(schedule.successor(micros(3400), micros(0)).event_deadline(), micros(4500));

        // repeated skips stay on deadline + k * interval
        let mut current = schedule;
        for event_time_us in [7_000, 20_000, 1_000_250] {
            current = current.successor(micros(event_time_us), micros(0));
            let deadline_us = current.event_deadline().timestamp_micros();
            assert_eq!(deadline_us % 1500, 0);
            assert!(deadline_us > event_time_us && deadline_us - event_time_us <= 1500);
        }
    }

    #[test]
    fn test_successor_when_event_time_stalled() {
        let schedule = Schedule::new("node", ts(1000), ts(0), Duration::from_secs(1));
        let next = schedule.successor(ts(0), ts(1001));

        assert_eq!(next.event_deadline(), ts(2000));
        assert_eq!(next.armed_at(), ts(1001));
    }

    #[test]
    fn test_successor_shares_cancellation() {
        let schedule = Schedule::new("node", ts(0), ts(0), Duration::from_millis(10));
        let next = schedule.successor(ts(0), ts(0));

        schedule.cancellable().cancel();
        assert!(next.is_cancelled());
        assert!(next.cancellable().same_as(schedule.cancellable()));
    }

    #[test]
    fn test_wall_clock_due_is_strict() {
        let schedule = Schedule::new("node", ts(0), ts(1000), Duration::from_millis(500));

        assert!(!schedule.is_wall_clock_due(ts(1499)));
        assert!(!schedule.is_wall_clock_due(ts(1500)));
        assert!(schedule.is_wall_clock_due(ts(1501)));
    }

    #[test]
    fn test_ordering_by_deadline_then_sequence() {
        let mut first = Schedule::new("a", ts(100), ts(0), Duration::from_millis(10));
        first.sequence = 2;
        let mut second = Schedule::new("b", ts(100), ts(0), Duration::from_millis(10));
        second.sequence = 1;
        let mut third = Schedule::new("c", ts(50), ts(0), Duration::from_millis(10));
        third.sequence = 3;

        let set = BTreeSet::from_iter([first, second, third]);
        let order: Vec<&str> = set.iter().map(|s| *s.node()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_validate_interval() {
        assert!(validate_interval(Duration::from_millis(1)).is_ok());
        assert!(validate_interval(Duration::from_micros(1500)).is_ok());
        assert!(validate_interval(Duration::from_secs(3600)).is_ok());

        assert!(matches!(
            validate_interval(Duration::ZERO),
            Err(Error::InvalidInterval(_))
        ));
        assert!(matches!(
            validate_interval(Duration::from_micros(500)),
            Err(Error::InvalidInterval(_))
        ));
        assert!(matches!(
            validate_interval(Duration::MAX),
            Err(Error::InvalidInterval(_))
        ));
    }
}
