//! Events, identifiers and the process call attached to an event

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::process::NONE_PROCESS;

/// Simulation time in abstract, non-negative time units
pub type Timestamp = u64;

/// Opaque state carried by processes and payloads
pub type StateData = serde_json::Value;

/// Unique identifier for an event within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Generate a fresh event id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a store within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub Uuid);

impl StoreId {
    /// Generate a fresh store id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an event.
///
/// `Scheduled` events fire when the clock reaches their timestamp. `Waiting`
/// events are suspended continuation tokens owned by a store; they never fire
/// by time and move to `Finished` only through a rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Scheduled,
    Waiting,
    Finished,
}

/// The process invocation an event carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessCall {
    /// Registered process type; `"none"` dispatches the built-in no-op
    #[serde(rename = "type")]
    pub process_type: String,
    /// Data merged into the process state when the event fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StateData>,
    /// Resume the parent's step instead of the definition's initial step
    #[serde(default, rename = "inheritStep")]
    pub inherit_step: bool,
}

impl ProcessCall {
    /// Call into the named process type
    pub fn new(process_type: impl Into<String>) -> Self {
        Self {
            process_type: process_type.into(),
            data: None,
            inherit_step: false,
        }
    }

    /// Attach call data
    pub fn with_data(mut self, data: StateData) -> Self {
        self.data = Some(data);
        self
    }

    /// Continue the parent's step rather than starting at `initial`
    pub fn inheriting(mut self) -> Self {
        self.inherit_step = true;
        self
    }
}

impl Default for ProcessCall {
    fn default() -> Self {
        Self::new(NONE_PROCESS)
    }
}

/// A scheduled (or waiting) instant at which a process step executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EventId>,
    #[serde(rename = "scheduledAt")]
    pub scheduled_at: Timestamp,
    /// Lower values fire first at equal time
    #[serde(default)]
    pub priority: i64,
    /// Waiting placeholders never become due by time alone
    #[serde(default)]
    pub waiting: bool,
    #[serde(default)]
    pub process: ProcessCall,
}

impl Event {
    /// Create an event due at the given time, with a freshly generated id
    pub fn at(scheduled_at: Timestamp) -> Self {
        Self {
            id: EventId::new(),
            parent: None,
            scheduled_at,
            priority: 0,
            waiting: false,
            process: ProcessCall::default(),
        }
    }

    pub fn with_parent(mut self, parent: EventId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_process(mut self, process: ProcessCall) -> Self {
        self.process = process;
        self
    }

    /// Turn the event into a waiting placeholder
    pub fn waiting(mut self) -> Self {
        self.waiting = true;
        self
    }
}
