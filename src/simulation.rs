//! The simulation container.
//!
//! A `Simulation` value is treated as immutable between steps: the scheduler
//! clones it, applies one step to the clone, and hands the successor back.
//! That discipline is what makes delta computation and replay possible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::event::{Event, EventId, EventState, StoreId, Timestamp};
use crate::process::{ProcessDefinition, ProcessRegistry, ProcessState};
use crate::store::Store;
use crate::timeline::Timeline;

/// Full simulation state: clock, timeline, process states, stores, and the
/// (non-serialized) process registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Simulation {
    #[serde(rename = "currentTime")]
    pub current_time: Timestamp,
    pub timeline: Timeline,
    pub state: BTreeMap<EventId, ProcessState>,
    pub stores: BTreeMap<StoreId, Store>,
    /// Step handlers are code, not data; a deserialized snapshot starts with
    /// the default registry and needs handlers re-attached to resume.
    #[serde(skip)]
    pub registry: ProcessRegistry,
}

impl Simulation {
    /// Fresh simulation at `t = 0` with only the built-in `"none"` process
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a process definition
    pub fn register_process(&mut self, definition: ProcessDefinition) {
        self.registry.register(definition);
    }

    /// Register a store and return its id
    pub fn register_store(&mut self, store: Store) -> StoreId {
        let id = store.id;
        self.stores.insert(id, store);
        id
    }

    /// Insert an event through the validated schedule path.
    ///
    /// Events flagged `waiting` are inserted as placeholders instead; they
    /// will not fire by time.
    pub fn schedule_event(&mut self, event: Event) -> SimResult<()> {
        if event.waiting {
            self.timeline.insert_waiting(event, self.current_time)
        } else {
            self.timeline.schedule(event, self.current_time)
        }
    }

    pub fn process_state(&self, id: EventId) -> Option<&ProcessState> {
        self.state.get(&id)
    }

    pub fn is_finished(&self, id: EventId) -> bool {
        self.timeline.status(id) == Some(EventState::Finished)
    }
}
