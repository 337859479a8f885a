//! The timeline: event records, their current status, and the append-only
//! transition log.
//!
//! The three collections are kept coordinated: every key in `status` has a
//! matching entry in `events`, and the last transition recorded for an id
//! equals its current status. The transition log doubles as the insertion
//! order used to break ties between events due at the same `(time, priority)`
//! key, which keeps selection deterministic across delta replay, pruning and
//! checkpoint restore.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::event::{Event, EventId, EventState, Timestamp};

/// One entry of the append-only audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: EventId,
    pub state: EventState,
    pub at: Timestamp,
}

/// Event records keyed by id, their status, and the transition log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub events: BTreeMap<EventId, Event>,
    pub status: BTreeMap<EventId, EventState>,
    pub transitions: Vec<Transition>,
}

impl Timeline {
    /// Insert an event through the validated schedule path.
    ///
    /// Fails with [`SimError::PastSchedule`] when the event is due before the
    /// current clock; nothing is mutated in that case.
    pub fn schedule(&mut self, event: Event, current_time: Timestamp) -> SimResult<()> {
        if event.scheduled_at < current_time {
            return Err(SimError::PastSchedule {
                event_id: event.id,
                scheduled_at: event.scheduled_at,
                current_time,
            });
        }
        self.insert(event, EventState::Scheduled, current_time);
        Ok(())
    }

    /// Insert a waiting placeholder.
    ///
    /// Placeholders bypass the due-time ordering but still carry the current
    /// time; a placeholder stamped in the past is rejected the same way.
    pub fn insert_waiting(&mut self, event: Event, current_time: Timestamp) -> SimResult<()> {
        if event.scheduled_at < current_time {
            return Err(SimError::PastSchedule {
                event_id: event.id,
                scheduled_at: event.scheduled_at,
                current_time,
            });
        }
        self.insert(event, EventState::Waiting, current_time);
        Ok(())
    }

    fn insert(&mut self, event: Event, state: EventState, at: Timestamp) {
        self.status.insert(event.id, state);
        self.transitions.push(Transition {
            id: event.id,
            state,
            at,
        });
        self.events.insert(event.id, event);
    }

    /// Record that an event finished at the given time
    pub fn mark_finished(&mut self, id: EventId, at: Timestamp) {
        self.status.insert(id, EventState::Finished);
        self.transitions.push(Transition {
            id,
            state: EventState::Finished,
            at,
        });
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.get(&id)
    }

    pub fn status(&self, id: EventId) -> Option<EventState> {
        self.status.get(&id).copied()
    }

    /// Finish stamp of an event, read back from the transition log
    pub fn finished_at(&self, id: EventId) -> Option<Timestamp> {
        self.transitions
            .iter()
            .rev()
            .find(|t| t.id == id && t.state == EventState::Finished)
            .map(|t| t.at)
    }

    /// Select the next event to fire: the scheduled event with the smallest
    /// `(scheduled_at, priority)` key, ties broken by insertion order.
    pub fn next_due(&self) -> Option<EventId> {
        let mut rank: HashMap<EventId, usize> = HashMap::new();
        for (index, transition) in self.transitions.iter().enumerate() {
            rank.entry(transition.id).or_insert(index);
        }
        self.status
            .iter()
            .filter(|(_, state)| **state == EventState::Scheduled)
            .filter_map(|(id, _)| self.events.get(id))
            .min_by_key(|event| {
                (
                    event.scheduled_at,
                    event.priority,
                    rank.get(&event.id).copied().unwrap_or(usize::MAX),
                )
            })
            .map(|event| event.id)
    }

    /// Number of events currently in the `Scheduled` state
    pub fn scheduled_count(&self) -> usize {
        self.status
            .values()
            .filter(|state| **state == EventState::Scheduled)
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn schedule_in_the_past_is_rejected_without_mutation() {
        let mut timeline = Timeline::default();
        let err = timeline.schedule(Event::at(4), 5).unwrap_err();
        assert!(matches!(err, SimError::PastSchedule { .. }));
        assert!(timeline.events.is_empty());
        assert!(timeline.status.is_empty());
        assert!(timeline.transitions.is_empty());
    }

    #[test]
    fn last_transition_matches_current_status() {
        let mut timeline = Timeline::default();
        let event = Event::at(10);
        let id = event.id;
        timeline.schedule(event, 0).unwrap();
        timeline.mark_finished(id, 10);

        assert_eq!(timeline.status(id), Some(EventState::Finished));
        let last = timeline
            .transitions
            .iter()
            .rev()
            .find(|t| t.id == id)
            .unwrap();
        assert_eq!(last.state, EventState::Finished);
        assert_eq!(timeline.finished_at(id), Some(10));
    }

    #[test]
    fn selection_orders_by_time_then_priority_then_insertion() {
        let mut timeline = Timeline::default();
        let late = Event::at(20);
        let low = Event::at(10).with_priority(5);
        let high = Event::at(10).with_priority(1);
        let high_again = Event::at(10).with_priority(1);

        let high_id = high.id;
        let high_again_id = high_again.id;
        let low_id = low.id;
        let late_id = late.id;

        timeline.schedule(late, 0).unwrap();
        timeline.schedule(low, 0).unwrap();
        timeline.schedule(high, 0).unwrap();
        timeline.schedule(high_again, 0).unwrap();

        for expected in [high_id, high_again_id, low_id, late_id] {
            let next = timeline.next_due().unwrap();
            assert_eq!(next, expected);
            let at = timeline.events[&next].scheduled_at;
            timeline.mark_finished(next, at);
        }
        assert_eq!(timeline.next_due(), None);
    }

    #[test]
    fn waiting_placeholders_are_never_due() {
        let mut timeline = Timeline::default();
        let placeholder = Event::at(5).waiting();
        timeline.insert_waiting(placeholder, 5).unwrap();
        assert_eq!(timeline.next_due(), None);
        assert_eq!(timeline.scheduled_count(), 0);
    }
}
