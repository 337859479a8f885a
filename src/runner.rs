//! The run loop: drive the scheduler to completion, optionally accumulating
//! deltas and writing periodic checkpoints.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::checkpoint::{prune_working_state, reconstruct_full_current, RunContext};
use crate::delta::{create_delta, DeltaEncodedSimulation};
use crate::error::SimResult;
use crate::event::{EventId, Timestamp};
use crate::scheduler::run_one;
use crate::simulation::Simulation;

/// Default parent directory for run roots when none is configured
pub const DEFAULT_RUN_DIRECTORY: &str = "runs";

/// Options controlling a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop once the clock reaches this time (checked at step boundaries)
    pub until_time: Option<Timestamp>,
    /// Stop once this event is finished (checked at step boundaries)
    pub until_event: Option<EventId>,
    /// Pacing hint in steps per second of wall time
    pub rate: Option<f64>,
    /// Parent directory for the run root; defaults to `runs/`
    pub run_directory: Option<PathBuf>,
    /// Stable run identifier; freshly generated when absent
    pub run_id: Option<String>,
    /// Write a checkpoint every this many deltas; `None` disables dumps
    pub dump_interval: Option<usize>,
    /// Free-form metadata recorded in the run manifest
    pub metadata: Option<Value>,
}

/// Closing report of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    /// Clock value at termination
    pub end: Timestamp,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Number of steps executed
    pub steps: usize,
}

fn pace(options: &RunOptions) {
    if let Some(rate) = options.rate {
        if rate > 0.0 {
            thread::sleep(Duration::from_secs_f64(1.0 / rate));
        }
    }
}

fn terminated(options: &RunOptions, sim: &Simulation) -> bool {
    if let Some(until) = options.until_time {
        if sim.current_time >= until {
            debug!(time = sim.current_time, until, "until_time reached");
            return true;
        }
    }
    if let Some(event_id) = options.until_event {
        if sim.is_finished(event_id) {
            debug!(event = %event_id, "until_event finished");
            return true;
        }
    }
    false
}

/// Run to completion, keeping only the final snapshot.
pub fn run_simulation(sim: Simulation, options: &RunOptions) -> SimResult<(Simulation, RunStats)> {
    let started = Instant::now();
    let mut current = sim;
    let mut steps = 0usize;

    loop {
        let Some(next) = run_one(&current)? else {
            break;
        };
        current = next;
        steps += 1;
        pace(options);
        if terminated(options, &current) {
            break;
        }
    }

    let stats = RunStats {
        end: current.current_time,
        duration: started.elapsed(),
        steps,
    };
    info!(end = stats.end, steps = stats.steps, "run complete");
    Ok((current, stats))
}

/// Run to completion with the full delta-encoded history.
///
/// With a `dump_interval` set, the encoded run is checkpointed to disk every
/// interval, the working set pruned, and on completion the checkpoints are
/// folded back with the in-memory tail into a replay-complete final
/// snapshot.
pub fn run_simulation_with_deltas(
    sim: Simulation,
    options: &RunOptions,
) -> SimResult<(DeltaEncodedSimulation, RunStats)> {
    let started = Instant::now();

    let mut context = match options.dump_interval {
        Some(interval) => {
            let directory = options
                .run_directory
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RUN_DIRECTORY));
            let run_id = options
                .run_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            Some(RunContext::resolve(
                &directory,
                &run_id,
                interval,
                options.metadata.clone(),
            )?)
        }
        None => None,
    };

    let mut encoded = DeltaEncodedSimulation::from_initial(sim);
    let mut checkpoints: Vec<PathBuf> = Vec::new();
    let mut steps = 0usize;

    loop {
        let Some(next) = run_one(&encoded.current)? else {
            break;
        };
        encoded.deltas.push(create_delta(&encoded.current, &next));
        encoded.current = next;
        steps += 1;
        pace(options);
        if terminated(options, &encoded.current) {
            break;
        }
        if let Some(context) = context.as_mut() {
            if encoded.deltas.len() >= context.interval() {
                let path = context.write_dump(&encoded)?;
                checkpoints.push(path);
                let compacted = prune_working_state(&encoded.current);
                encoded.base = compacted.clone();
                encoded.deltas.clear();
                encoded.current = compacted;
            }
        }
    }

    if !checkpoints.is_empty() {
        let full = reconstruct_full_current(&checkpoints, &encoded.current)?;
        encoded.base = full.clone();
        encoded.deltas.clear();
        encoded.current = full;
    }

    let stats = RunStats {
        end: encoded.current.current_time,
        duration: started.elapsed(),
        steps,
    };
    info!(
        end = stats.end,
        steps = stats.steps,
        checkpoints = checkpoints.len(),
        "delta run complete"
    );
    Ok((encoded, stats))
}
