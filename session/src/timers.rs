//! Timer arena driving every suspension point of the session.
//!
//! Timers live in a [`SlotMap`], so a [`TimerId`] stops resolving once its
//! timer fires or is cancelled. The due queue is a min-heap with lazy
//! invalidation: cancelling or pausing a timer only touches its slot, and
//! stale heap entries are skipped when they surface.

use std::{cmp::Reverse, collections::BinaryHeap, time::Duration};

use slotmap::{new_key_type, SlotMap};
use wavekeeper_core::{AgentId, ResetReason, RoundIndex};

/// Work performed when a timer fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Scheduled spawn belonging to a round's timetable.
    Spawn { round: RoundIndex },
    /// Deadline of an agent holding a resource.
    Deadline { agent: AgentId },
    /// Supervisory timeout of a round.
    RoundTimeout { round: RoundIndex },
    /// Start of the round following a completed one.
    NextRound { round: RoundIndex },
    /// Staggered redirect of an agent after every resource was lost.
    Redirect { agent: AgentId },
    /// End of the grace period following a resource cascade.
    CascadeGrace,
    /// Full reset after a failure notification was displayed.
    Reset { reason: ResetReason },
}

new_key_type! {
    /// Token returned by [`Timers::schedule`].
    pub(crate) struct TimerId;
}

#[derive(Clone, Copy, Debug)]
enum SlotState {
    Running {
        due: Duration,
        sequence: u64,
        kind: TimerKind,
    },
    Paused {
        remaining: Duration,
        kind: TimerKind,
    },
}

/// Arena of running and paused timers.
#[derive(Debug, Default)]
pub(crate) struct Timers {
    slots: SlotMap<TimerId, SlotState>,
    queue: BinaryHeap<Reverse<(Duration, u64, TimerId)>>,
    next_sequence: u64,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arms a timer that fires `delay` after `now`.
    pub(crate) fn schedule(&mut self, now: Duration, delay: Duration, kind: TimerKind) -> TimerId {
        let due = now.saturating_add(delay);
        let sequence = self.take_sequence();
        let id = self.slots.insert(SlotState::Running {
            due,
            sequence,
            kind,
        });
        self.queue.push(Reverse((due, sequence, id)));
        id
    }

    /// Cancels the timer. Returns `false` if it already fired or was cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Freezes a running timer, returning the time it had left.
    pub(crate) fn pause(&mut self, id: TimerId, now: Duration) -> Option<Duration> {
        let state = self.slots.get_mut(id)?;
        let SlotState::Running { due, kind, .. } = *state else {
            return None;
        };
        let remaining = due.saturating_sub(now);
        *state = SlotState::Paused { remaining, kind };
        Some(remaining)
    }

    /// Restarts a paused timer from its frozen remaining time.
    pub(crate) fn resume(&mut self, id: TimerId, now: Duration) -> Option<Duration> {
        let SlotState::Paused { remaining, kind } = *self.slots.get(id)? else {
            return None;
        };
        let due = now.saturating_add(remaining);
        let sequence = self.take_sequence();
        self.slots[id] = SlotState::Running {
            due,
            sequence,
            kind,
        };
        self.queue.push(Reverse((due, sequence, id)));
        Some(remaining)
    }

    /// Time left before the timer fires, frozen while paused.
    pub(crate) fn remaining(&self, id: TimerId, now: Duration) -> Option<Duration> {
        match *self.slots.get(id)? {
            SlotState::Running { due, .. } => Some(due.saturating_sub(now)),
            SlotState::Paused { remaining, .. } => Some(remaining),
        }
    }

    /// Removes and returns the earliest running timer due at or before `until`.
    pub(crate) fn pop_due(&mut self, until: Duration) -> Option<(Duration, TimerKind)> {
        while let Some(&Reverse((due, sequence, id))) = self.queue.peek() {
            let live = match self.slots.get(id) {
                Some(&SlotState::Running {
                    sequence: current,
                    kind,
                    ..
                }) if current == sequence => Some(kind),
                _ => None,
            };

            let Some(kind) = live else {
                let _ = self.queue.pop();
                continue;
            };

            if due > until {
                return None;
            }

            let _ = self.queue.pop();
            let _ = self.slots.remove(id);
            return Some((due, kind));
        }
        None
    }

    /// Number of timers that are running or paused.
    pub(crate) fn active(&self) -> usize {
        self.slots.len()
    }

    /// Cancels every timer, invalidating all outstanding tokens.
    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.slots.clear();
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deadline(agent: u32) -> TimerKind {
        TimerKind::Deadline {
            agent: AgentId::new(agent),
        }
    }

    #[test]
    fn timers_fire_in_due_order_then_scheduling_order() {
        let mut timers = Timers::new();
        let _ = timers.schedule(Duration::ZERO, Duration::from_secs(2), deadline(1));
        let _ = timers.schedule(Duration::ZERO, Duration::from_secs(1), deadline(2));
        let _ = timers.schedule(Duration::ZERO, Duration::from_secs(1), deadline(3));

        let fired: Vec<_> = std::iter::from_fn(|| timers.pop_due(Duration::from_secs(5))).collect();
        assert_eq!(
            fired,
            vec![
                (Duration::from_secs(1), deadline(2)),
                (Duration::from_secs(1), deadline(3)),
                (Duration::from_secs(2), deadline(1)),
            ]
        );
        assert_eq!(timers.active(), 0);
    }

    #[test]
    fn timers_wait_until_due() {
        let mut timers = Timers::new();
        let _ = timers.schedule(Duration::ZERO, Duration::from_secs(3), deadline(1));
        assert!(timers.pop_due(Duration::from_millis(2_999)).is_none());
        assert!(timers.pop_due(Duration::from_secs(3)).is_some());
    }

    #[test]
    fn cancel_is_idempotent_and_suppresses_expiry() {
        let mut timers = Timers::new();
        let id = timers.schedule(Duration::ZERO, Duration::from_secs(1), deadline(1));
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(timers.pop_due(Duration::from_secs(10)).is_none());
    }

    #[test]
    fn cancel_after_fire_is_a_no_op() {
        let mut timers = Timers::new();
        let id = timers.schedule(Duration::ZERO, Duration::from_secs(1), deadline(1));
        assert!(timers.pop_due(Duration::from_secs(1)).is_some());
        assert!(!timers.cancel(id));
    }

    #[test]
    fn recycled_slots_do_not_honour_stale_tokens() {
        let mut timers = Timers::new();
        let stale = timers.schedule(Duration::ZERO, Duration::from_secs(1), deadline(1));
        assert!(timers.cancel(stale));
        let fresh = timers.schedule(Duration::ZERO, Duration::from_secs(1), deadline(2));

        assert!(!timers.cancel(stale));
        assert!(timers.remaining(fresh, Duration::ZERO).is_some());
    }

    #[test]
    fn paused_timer_resumes_with_frozen_remaining_time() {
        let mut timers = Timers::new();
        let id = timers.schedule(Duration::ZERO, Duration::from_secs(5), deadline(1));

        assert_eq!(timers.pause(id, Duration::from_secs(2)), Some(Duration::from_secs(3)));
        assert!(timers.pop_due(Duration::from_secs(100)).is_none());
        assert_eq!(timers.pause(id, Duration::from_secs(50)), None);

        assert_eq!(timers.resume(id, Duration::from_secs(100)), Some(Duration::from_secs(3)));
        assert_eq!(timers.resume(id, Duration::from_secs(100)), None);
        assert!(timers.pop_due(Duration::from_millis(102_999)).is_none());
        assert_eq!(
            timers.pop_due(Duration::from_secs(103)),
            Some((Duration::from_secs(103), deadline(1)))
        );
    }

    #[test]
    fn clear_invalidates_every_token() {
        let mut timers = Timers::new();
        let running = timers.schedule(Duration::ZERO, Duration::from_secs(1), deadline(1));
        let paused = timers.schedule(Duration::ZERO, Duration::from_secs(1), deadline(2));
        let _ = timers.pause(paused, Duration::ZERO);

        timers.clear();

        assert_eq!(timers.active(), 0);
        assert!(!timers.cancel(running));
        assert!(timers.resume(paused, Duration::ZERO).is_none());
        assert!(timers.pop_due(Duration::MAX).is_none());
    }
}
