//! Error types for the simulation kernel

use std::path::PathBuf;

use thiserror::Error;

use crate::event::{EventId, StoreId, Timestamp};

/// Result type for kernel operations
pub type SimResult<T> = Result<T, SimError>;

/// Error taxonomy for the simulation kernel.
///
/// Validation errors surface at the API boundary before any state is
/// mutated. Errors raised inside a step handler abort the run; the latest
/// successful snapshot remains replayable.
#[derive(Error, Debug)]
pub enum SimError {
    /// Attempt to schedule an event before the current clock
    #[error("cannot schedule event {event_id} at t={scheduled_at}: clock is already at t={current_time}")]
    PastSchedule {
        event_id: EventId,
        scheduled_at: Timestamp,
        current_time: Timestamp,
    },

    /// Event dispatched to a process type absent from the registry
    #[error("process type {0:?} is not registered")]
    UnknownProcessType(String),

    /// Event dispatched to a step name absent from the process definition
    #[error("process {process_type:?} has no step named {step:?}")]
    UnknownStep { process_type: String, step: String },

    /// Store operation against an unregistered store id
    #[error("store {0} is not registered")]
    StoreNotFound(StoreId),

    /// A dequeued put request or buffered item carried no payload
    #[error("store {store_id} dequeued entry {event_id} without a payload")]
    MissingPayload {
        store_id: StoreId,
        event_id: EventId,
    },

    /// Queue discipline outside the supported set
    #[error("unsupported queue discipline {0:?}")]
    UnsupportedDiscipline(String),

    /// Step handler reported a failure
    #[error("step execution failed: {0}")]
    StepFailed(String),

    /// Failure to read or write a checkpoint or manifest
    #[error("checkpoint I/O failed for {}: {source}", path.display())]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint parse error or structural inconsistency
    #[error("corrupt checkpoint {}: {reason}", path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::{EventId, StoreId};

    #[test]
    fn past_schedule_names_both_times() {
        let err = SimError::PastSchedule {
            event_id: EventId::new(),
            scheduled_at: 4,
            current_time: 5,
        };
        let text = err.to_string();
        assert!(text.contains("t=4"));
        assert!(text.contains("t=5"));
    }

    #[test]
    fn store_not_found_names_the_store() {
        let id = StoreId::new();
        let err = SimError::StoreNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn corrupt_checkpoint_names_the_file() {
        let err = SimError::CorruptCheckpoint {
            path: PathBuf::from("dumps/3-t42.json"),
            reason: "truncated".to_string(),
        };
        assert!(err.to_string().contains("3-t42.json"));
        assert!(err.to_string().contains("truncated"));
    }
}
