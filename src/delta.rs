//! Delta computation and replay over simulation snapshots.
//!
//! A delta records what changed between two consecutive snapshots, one ops
//! list per collection. Event records are immutable once inserted, so the
//! `e` list only ever carries insertions; lifecycle changes travel through
//! the status and transition lists. Applying a delta never mutates its
//! inputs, and `apply_delta(prev, create_delta(prev, curr))` reproduces
//! `curr` structurally.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventId, EventState, StoreId, Timestamp};
use crate::process::{ProcessRegistry, ProcessState};
use crate::simulation::Simulation;
use crate::store::Store;
use crate::timeline::Transition;

/// One change record in a delta ops list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DeltaOp<K, V> {
    /// Insert or overwrite the keyed entry
    Set { id: K, value: V },
    /// Append to an ordered log
    Add { id: K, value: V },
    /// Remove the keyed entry
    Delete { id: K },
}

/// Changes between two consecutive snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationDelta {
    /// Clock of the successor snapshot
    pub c: Timestamp,
    /// New event records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub e: Vec<DeltaOp<EventId, Event>>,
    /// Status changes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub es: Vec<DeltaOp<EventId, EventState>>,
    /// Transition log additions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub et: Vec<DeltaOp<EventId, Transition>>,
    /// Process state changes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub s: Vec<DeltaOp<EventId, ProcessState>>,
    /// Store changes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub st: Vec<DeltaOp<StoreId, Store>>,
}

impl SimulationDelta {
    pub fn is_empty(&self) -> bool {
        self.e.is_empty()
            && self.es.is_empty()
            && self.et.is_empty()
            && self.s.is_empty()
            && self.st.is_empty()
    }
}

/// Diff two consecutive snapshots into a compact delta
pub fn create_delta(prev: &Simulation, curr: &Simulation) -> SimulationDelta {
    let mut delta = SimulationDelta {
        c: curr.current_time,
        ..SimulationDelta::default()
    };

    for (id, event) in &curr.timeline.events {
        if !prev.timeline.events.contains_key(id) {
            delta.e.push(DeltaOp::Set {
                id: *id,
                value: event.clone(),
            });
        }
    }
    for (id, status) in &curr.timeline.status {
        if prev.timeline.status.get(id) != Some(status) {
            delta.es.push(DeltaOp::Set {
                id: *id,
                value: *status,
            });
        }
    }
    for transition in curr
        .timeline
        .transitions
        .iter()
        .skip(prev.timeline.transitions.len())
    {
        delta.et.push(DeltaOp::Add {
            id: transition.id,
            value: transition.clone(),
        });
    }
    for (id, state) in &curr.state {
        if prev.state.get(id) != Some(state) {
            delta.s.push(DeltaOp::Set {
                id: *id,
                value: state.clone(),
            });
        }
    }
    for (id, store) in &curr.stores {
        if prev.stores.get(id) != Some(store) {
            delta.st.push(DeltaOp::Set {
                id: *id,
                value: store.clone(),
            });
        }
    }
    for id in prev.stores.keys() {
        if !curr.stores.contains_key(id) {
            delta.st.push(DeltaOp::Delete { id: *id });
        }
    }

    delta
}

fn apply_map_ops<K: Ord + Copy, V: Clone>(map: &mut BTreeMap<K, V>, ops: &[DeltaOp<K, V>]) {
    for op in ops {
        match op {
            DeltaOp::Set { id, value } | DeltaOp::Add { id, value } => {
                map.insert(*id, value.clone());
            }
            DeltaOp::Delete { id } => {
                map.remove(id);
            }
        }
    }
}

/// Replay one delta on top of a base snapshot.
///
/// Ops are applied in a fixed order (events, status, transitions, state,
/// stores); the base is not mutated.
pub fn apply_delta(base: &Simulation, delta: &SimulationDelta) -> Simulation {
    let mut next = base.clone();
    next.current_time = delta.c;
    apply_map_ops(&mut next.timeline.events, &delta.e);
    apply_map_ops(&mut next.timeline.status, &delta.es);
    for op in &delta.et {
        if let DeltaOp::Set { value, .. } | DeltaOp::Add { value, .. } = op {
            next.timeline.transitions.push(value.clone());
        }
    }
    apply_map_ops(&mut next.state, &delta.s);
    apply_map_ops(&mut next.stores, &delta.st);
    next
}

/// Expand a base plus delta log into the full snapshot sequence
pub fn reconstruct_from_deltas(base: &Simulation, deltas: &[SimulationDelta]) -> Vec<Simulation> {
    let mut snapshots = Vec::with_capacity(deltas.len() + 1);
    snapshots.push(base.clone());
    for delta in deltas {
        let next = {
            let last = snapshots.last().unwrap_or(base);
            apply_delta(last, delta)
        };
        snapshots.push(next);
    }
    snapshots
}

/// A run kept as base snapshot, delta log, and current snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaEncodedSimulation {
    pub base: Simulation,
    pub deltas: Vec<SimulationDelta>,
    pub current: Simulation,
}

impl DeltaEncodedSimulation {
    /// Wrap an initial snapshot with an empty delta log
    pub fn from_initial(sim: Simulation) -> Self {
        Self {
            base: sim.clone(),
            deltas: Vec::new(),
            current: sim,
        }
    }

    /// Re-associate step handlers after deserialization.
    ///
    /// Loaded checkpoints are data-only; without a registry they support
    /// inspection and replay analysis but cannot resume execution.
    pub fn attach_registry(&mut self, registry: ProcessRegistry) {
        self.base.registry = registry.clone();
        self.current.registry = registry;
    }
}

/// Structural equality over the serialized data model (the registry is code
/// and is ignored)
pub fn snapshots_equal(a: &Simulation, b: &Simulation) -> bool {
    a.current_time == b.current_time
        && a.timeline == b.timeline
        && a.state == b.state
        && a.stores == b.stores
}
