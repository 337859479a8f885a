//! On-disk checkpoints: the run directory, its manifest, dump files, and
//! the pruning/merging that keeps long runs replayable.
//!
//! A run directory holds `run.json` (the manifest) and a `dumps/` directory
//! of `{seq}-t{time}.json` files, each a serialized
//! [`DeltaEncodedSimulation`]. The sequence counter lives in the manifest so
//! a resumed run keeps numbering where it left off.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::delta::DeltaEncodedSimulation;
use crate::error::{SimError, SimResult};
use crate::event::{EventId, EventState};
use crate::simulation::Simulation;
use crate::timeline::Timeline;

/// Manifest file name inside the run root
pub const MANIFEST_FILE: &str = "run.json";
/// Dump directory name inside the run root
pub const DUMPS_DIR: &str = "dumps";

/// Dump bookkeeping inside the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpSettings {
    pub directory: PathBuf,
    pub interval: usize,
    /// Next dump sequence number; monotonic per run directory
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_file: Option<String>,
}

/// The `run.json` manifest, rewritten on context creation and every dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub run_root: PathBuf,
    pub dump: DumpSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A resolved run directory with its manifest
#[derive(Debug)]
pub struct RunContext {
    root: PathBuf,
    manifest: RunManifest,
}

impl RunContext {
    /// Create or re-open a run directory under `directory/run_id`.
    ///
    /// An existing manifest is read back so the dump sequence continues;
    /// otherwise a fresh manifest is written. Directories are created as
    /// needed.
    pub fn resolve(
        directory: &Path,
        run_id: &str,
        interval: usize,
        metadata: Option<Value>,
    ) -> SimResult<Self> {
        let root = directory.join(run_id);
        let dumps = root.join(DUMPS_DIR);
        fs::create_dir_all(&dumps).map_err(|source| SimError::CheckpointIo {
            path: dumps.clone(),
            source,
        })?;

        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            let bytes = fs::read(&manifest_path).map_err(|source| SimError::CheckpointIo {
                path: manifest_path.clone(),
                source,
            })?;
            let mut manifest: RunManifest =
                serde_json::from_slice(&bytes).map_err(|err| SimError::CorruptCheckpoint {
                    path: manifest_path.clone(),
                    reason: err.to_string(),
                })?;
            manifest.updated_at = Utc::now();
            manifest.dump.interval = interval.max(1);
            if metadata.is_some() {
                manifest.metadata = metadata;
            }
            manifest
        } else {
            let now = Utc::now();
            RunManifest {
                run_id: run_id.to_string(),
                created_at: now,
                updated_at: now,
                run_root: root.clone(),
                dump: DumpSettings {
                    directory: dumps,
                    interval: interval.max(1),
                    count: 0,
                    last_file: None,
                },
                metadata,
            }
        };

        let context = Self { root, manifest };
        context.write_manifest()?;
        Ok(context)
    }

    pub fn manifest(&self) -> &RunManifest {
        &self.manifest
    }

    pub fn interval(&self) -> usize {
        self.manifest.dump.interval
    }

    /// Serialize the encoded run to the next `{seq}-t{time}.json` dump file
    /// and rewrite the manifest.
    pub fn write_dump(&mut self, encoded: &DeltaEncodedSimulation) -> SimResult<PathBuf> {
        let sequence = self.manifest.dump.count;
        let name = format!("{}-t{}.json", sequence, encoded.current.current_time);
        let path = self.root.join(DUMPS_DIR).join(&name);

        let bytes = serde_json::to_vec(encoded).map_err(|err| SimError::CheckpointIo {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        })?;
        fs::write(&path, bytes).map_err(|source| SimError::CheckpointIo {
            path: path.clone(),
            source,
        })?;

        self.manifest.dump.count = sequence + 1;
        self.manifest.dump.last_file = Some(name);
        self.manifest.updated_at = Utc::now();
        self.write_manifest()?;

        info!(path = %path.display(), time = encoded.current.current_time, "checkpoint written");
        Ok(path)
    }

    fn write_manifest(&self) -> SimResult<()> {
        let path = self.root.join(MANIFEST_FILE);
        let bytes =
            serde_json::to_vec_pretty(&self.manifest).map_err(|err| SimError::CheckpointIo {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            })?;
        fs::write(&path, bytes).map_err(|source| SimError::CheckpointIo { path, source })
    }
}

/// Read one dump file back into a data-only encoded run
pub fn read_dump(path: &Path) -> SimResult<DeltaEncodedSimulation> {
    let bytes = fs::read(path).map_err(|source| SimError::CheckpointIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|err| SimError::CorruptCheckpoint {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Compact the working set after a dump.
///
/// Finished events, their statuses and their transitions are dropped.
/// Process state survives for retained events and for ids a retained event
/// still names as parent. Stores are kept as-is.
pub fn prune_working_state(sim: &Simulation) -> Simulation {
    let retained: BTreeSet<EventId> = sim
        .timeline
        .status
        .iter()
        .filter(|(_, state)| **state != EventState::Finished)
        .map(|(id, _)| *id)
        .collect();

    let timeline = Timeline {
        events: sim
            .timeline
            .events
            .iter()
            .filter(|(id, _)| retained.contains(id))
            .map(|(id, event)| (*id, event.clone()))
            .collect(),
        status: sim
            .timeline
            .status
            .iter()
            .filter(|(id, _)| retained.contains(id))
            .map(|(id, state)| (*id, *state))
            .collect(),
        transitions: sim
            .timeline
            .transitions
            .iter()
            .filter(|t| retained.contains(&t.id))
            .cloned()
            .collect(),
    };

    let mut keep_state = retained;
    for event in timeline.events.values() {
        if let Some(parent) = event.parent {
            keep_state.insert(parent);
        }
    }

    Simulation {
        current_time: sim.current_time,
        state: sim
            .state
            .iter()
            .filter(|(id, _)| keep_state.contains(id))
            .map(|(id, state)| (*id, state.clone()))
            .collect(),
        timeline,
        stores: sim.stores.clone(),
        registry: sim.registry.clone(),
    }
}

/// Fold two replay states: transitions concatenate, keyed collections are
/// overlaid with `curr` taking precedence, scalars come from `curr`.
pub fn merge_replay_state(prev: &Simulation, curr: &Simulation) -> Simulation {
    let mut merged = prev.clone();
    merged.current_time = curr.current_time;
    merged.registry = curr.registry.clone();

    merged
        .timeline
        .transitions
        .extend(curr.timeline.transitions.iter().cloned());
    for (id, event) in &curr.timeline.events {
        merged.timeline.events.insert(*id, event.clone());
    }
    for (id, status) in &curr.timeline.status {
        merged.timeline.status.insert(*id, *status);
    }
    for (id, state) in &curr.state {
        merged.state.insert(*id, state.clone());
    }
    for (id, store) in &curr.stores {
        merged.stores.insert(*id, store.clone());
    }
    merged
}

/// Rebuild the replay-complete final snapshot from the on-disk checkpoints
/// plus the in-memory tail.
pub fn reconstruct_full_current(
    checkpoints: &[PathBuf],
    tail: &Simulation,
) -> SimResult<Simulation> {
    let mut merged: Option<Simulation> = None;
    for path in checkpoints {
        let encoded = read_dump(path)?;
        merged = Some(match merged {
            Some(prev) => merge_replay_state(&prev, &encoded.current),
            None => encoded.current,
        });
    }
    Ok(match merged {
        Some(prev) => merge_replay_state(&prev, tail),
        None => tail.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::process::ProcessState;
    use serde_json::json;

    #[test]
    fn prune_drops_finished_events_and_their_history() {
        let mut sim = Simulation::new();
        let done = Event::at(1);
        let done_id = done.id;
        let pending = Event::at(5).with_parent(done_id);
        let pending_id = pending.id;
        sim.schedule_event(done).unwrap();
        sim.schedule_event(pending).unwrap();
        sim.current_time = 1;
        sim.timeline.mark_finished(done_id, 1);
        sim.state
            .insert(done_id, ProcessState::new("none", "idle", json!({})));

        let pruned = prune_working_state(&sim);
        assert!(pruned.timeline.event(done_id).is_none());
        assert!(pruned.timeline.event(pending_id).is_some());
        assert!(pruned.timeline.transitions.iter().all(|t| t.id != done_id));
        // state survives because the pending event names it as parent
        assert!(pruned.process_state(done_id).is_some());
    }

    #[test]
    fn prune_drops_unreferenced_state() {
        let mut sim = Simulation::new();
        let done = Event::at(1);
        let done_id = done.id;
        sim.schedule_event(done).unwrap();
        sim.current_time = 1;
        sim.timeline.mark_finished(done_id, 1);
        sim.state
            .insert(done_id, ProcessState::new("none", "idle", json!({})));

        let pruned = prune_working_state(&sim);
        assert!(pruned.process_state(done_id).is_none());
        assert!(pruned.timeline.events.is_empty());
    }

    #[test]
    fn merge_concatenates_transitions_and_prefers_curr() {
        let mut prev = Simulation::new();
        let shared = Event::at(1);
        let shared_id = shared.id;
        prev.schedule_event(shared.clone()).unwrap();

        let mut curr = Simulation::new();
        curr.current_time = 9;
        curr.schedule_event(shared).unwrap();
        curr.timeline.mark_finished(shared_id, 9);

        let merged = merge_replay_state(&prev, &curr);
        assert_eq!(merged.current_time, 9);
        assert_eq!(merged.timeline.status(shared_id), Some(EventState::Finished));
        // one transition from prev, two from curr
        assert_eq!(merged.timeline.transitions.len(), 3);
    }

    #[test]
    fn context_creates_directories_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let context = RunContext::resolve(dir.path(), "run-1", 10, None).unwrap();
        assert!(dir.path().join("run-1").join(DUMPS_DIR).is_dir());
        assert!(dir.path().join("run-1").join(MANIFEST_FILE).is_file());
        assert_eq!(context.manifest().dump.count, 0);
        assert_eq!(context.interval(), 10);
    }

    #[test]
    fn dump_sequence_survives_a_reopened_context() {
        let dir = tempfile::tempdir().unwrap();
        let encoded = DeltaEncodedSimulation::from_initial(Simulation::new());

        let mut context = RunContext::resolve(dir.path(), "run-1", 2, None).unwrap();
        let first = context.write_dump(&encoded).unwrap();
        assert!(first.ends_with("0-t0.json"));

        let mut reopened = RunContext::resolve(dir.path(), "run-1", 2, None).unwrap();
        assert_eq!(reopened.manifest().dump.count, 1);
        let second = reopened.write_dump(&encoded).unwrap();
        assert!(second.ends_with("1-t0.json"));
        assert_eq!(
            reopened.manifest().dump.last_file.as_deref(),
            Some("1-t0.json")
        );
    }

    #[test]
    fn read_dump_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut sim = Simulation::new();
        sim.schedule_event(Event::at(3)).unwrap();
        let encoded = DeltaEncodedSimulation::from_initial(sim);

        let mut context = RunContext::resolve(dir.path(), "run-1", 1, None).unwrap();
        let path = context.write_dump(&encoded).unwrap();

        let loaded = read_dump(&path).unwrap();
        assert!(crate::delta::snapshots_equal(&loaded.current, &encoded.current));
    }

    #[test]
    fn unparseable_dump_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0-t0.json");
        fs::write(&path, b"{ not json").unwrap();
        let err = read_dump(&path).unwrap_err();
        assert!(matches!(err, SimError::CorruptCheckpoint { .. }));
    }

    #[test]
    fn missing_dump_is_an_io_error() {
        let err = read_dump(Path::new("/nonexistent/0-t0.json")).unwrap_err();
        assert!(matches!(err, SimError::CheckpointIo { .. }));
    }
}
