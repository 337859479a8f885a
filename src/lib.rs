//! Deterministic discrete-event simulation kernel with replayable history
//!
//! This crate provides a single-threaded DES kernel that:
//! - Advances a logical clock by firing timestamped events in
//!   `(time, priority)` order with deterministic tie-breaking
//! - Dispatches events to registered processes: named state machines whose
//!   steps return a successor state plus follow-up events
//! - Synchronizes processes through stores: bounded blocking/non-blocking
//!   queues with FIFO/LIFO discipline and matched put/get rendezvous
//! - Keeps the full history as a delta-encoded log with periodic on-disk
//!   checkpoints, in-memory pruning, and full-replay reconstruction
//!
//! The simulation value is immutable between steps: each step clones the
//! current snapshot and produces a successor, which is what makes the delta
//! log complete and every run replayable from its checkpoints.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod checkpoint;
pub mod delta;
pub mod error;
pub mod event;
pub mod process;
pub mod runner;
pub mod scheduler;
pub mod simulation;
pub mod store;
pub mod timeline;

pub use checkpoint::{
    merge_replay_state, prune_working_state, read_dump, reconstruct_full_current, RunContext,
    RunManifest,
};
pub use delta::{
    apply_delta, create_delta, reconstruct_from_deltas, snapshots_equal, DeltaEncodedSimulation,
    DeltaOp, SimulationDelta,
};
pub use error::{SimError, SimResult};
pub use event::{Event, EventId, EventState, ProcessCall, StateData, StoreId, Timestamp};
pub use process::{
    merge_data, ProcessDefinition, ProcessRegistry, ProcessState, StepHandler, StepOutcome,
    NONE_PROCESS,
};
pub use runner::{run_simulation, run_simulation_with_deltas, RunOptions, RunStats};
pub use scheduler::run_one;
pub use simulation::Simulation;
pub use store::{Discipline, Store, StoreConfig, StoreResponse};
pub use timeline::{Timeline, Transition};
