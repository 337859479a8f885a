//! Process definitions, the registry, and per-event process state.
//!
//! A process is a named state machine: a set of step handlers plus the name
//! of the initial step. Handlers are plain functions from `(simulation,
//! event, state)` to a [`StepOutcome`]; they are executable code and are
//! never serialized. Checkpoints persist data only; a loaded snapshot must
//! be given a registry again before it can resume execution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SimError, SimResult};
use crate::event::{Event, StateData};
use crate::simulation::Simulation;

/// Reserved process type dispatched when an event carries no explicit process
pub const NONE_PROCESS: &str = "none";

/// The mutable state of one process instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    #[serde(rename = "type")]
    pub process_type: String,
    pub step: String,
    #[serde(default)]
    pub data: StateData,
}

impl ProcessState {
    pub fn new(process_type: impl Into<String>, step: impl Into<String>, data: StateData) -> Self {
        Self {
            process_type: process_type.into(),
            step: step.into(),
            data,
        }
    }

    /// Successor state at a different step, keeping the data
    pub fn advanced_to(&self, step: impl Into<String>) -> Self {
        Self {
            process_type: self.process_type.clone(),
            step: step.into(),
            data: self.data.clone(),
        }
    }
}

/// What a step handler hands back to the scheduler
pub struct StepOutcome {
    /// Successor process state, stored under the fired event's id
    pub state: ProcessState,
    /// Events to insert: waiting placeholders as `Waiting`, the rest through
    /// the validated schedule path
    pub next: Vec<Event>,
}

impl StepOutcome {
    pub fn new(state: ProcessState) -> Self {
        Self {
            state,
            next: Vec::new(),
        }
    }

    pub fn with_next(mut self, next: Vec<Event>) -> Self {
        self.next = next;
        self
    }
}

/// Step handler signature. Handlers may mutate stores (through
/// [`Simulation::get`]/[`Simulation::put`]) and read any simulation state;
/// the scheduler applies the returned outcome afterwards.
pub type StepHandler =
    Arc<dyn Fn(&mut Simulation, &Event, ProcessState) -> SimResult<StepOutcome> + Send + Sync>;

/// A named state machine: immutable once registered
#[derive(Clone)]
pub struct ProcessDefinition {
    process_type: String,
    initial: String,
    steps: HashMap<String, StepHandler>,
}

impl ProcessDefinition {
    pub fn new(process_type: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            process_type: process_type.into(),
            initial: initial.into(),
            steps: HashMap::new(),
        }
    }

    /// Register a step handler under the given name
    pub fn step<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Simulation, &Event, ProcessState) -> SimResult<StepOutcome>
            + Send
            + Sync
            + 'static,
    {
        self.steps.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn handler(&self, step: &str) -> SimResult<&StepHandler> {
        self.steps.get(step).ok_or_else(|| SimError::UnknownStep {
            process_type: self.process_type.clone(),
            step: step.to_string(),
        })
    }
}

impl std::fmt::Debug for ProcessDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut steps: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        steps.sort_unstable();
        f.debug_struct("ProcessDefinition")
            .field("process_type", &self.process_type)
            .field("initial", &self.initial)
            .field("steps", &steps)
            .finish()
    }
}

/// Registry of process definitions, keyed by type.
///
/// Re-registering a type replaces the previous definition; running process
/// instances are not migrated.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    definitions: HashMap<String, ProcessDefinition>,
}

impl ProcessRegistry {
    pub fn register(&mut self, definition: ProcessDefinition) {
        self.definitions
            .insert(definition.process_type().to_string(), definition);
    }

    pub fn definition(&self, process_type: &str) -> SimResult<&ProcessDefinition> {
        self.definitions
            .get(process_type)
            .ok_or_else(|| SimError::UnknownProcessType(process_type.to_string()))
    }

    pub fn contains(&self, process_type: &str) -> bool {
        self.definitions.contains_key(process_type)
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        let mut registry = Self {
            definitions: HashMap::new(),
        };
        registry.register(
            ProcessDefinition::new(NONE_PROCESS, "idle")
                .step("idle", |_, _, state| Ok(StepOutcome::new(state))),
        );
        registry
    }
}

/// Shallow merge: overlay keys win over base keys.
///
/// Non-object overlays replace the base outright; a `Null` overlay keeps it.
pub fn merge_data(base: &StateData, overlay: &StateData) -> StateData {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            let mut merged = b.clone();
            for (key, value) in o {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        _ => overlay.clone(),
    }
}

/// Shallow merge where the overlay may be absent
pub fn merge_opt(base: &StateData, overlay: Option<&StateData>) -> StateData {
    match overlay {
        Some(overlay) => merge_data(base, overlay),
        None => base.clone(),
    }
}
