//! Dispatch: fire the next due event against its process step.
//!
//! Each step takes the current simulation value and produces a successor
//! value; the caller keeps both, which is what the delta engine diffs.

use tracing::{debug, trace, warn};

use crate::error::SimResult;
use crate::event::Event;
use crate::process::{merge_opt, ProcessState, StepOutcome};
use crate::simulation::Simulation;

/// Execute one step: fire the next due event and return the successor
/// simulation, or `None` when no `Scheduled` event remains.
///
/// The successor has the clock advanced to the fired event's time, the
/// event marked `Finished`, the handler's state stored under the event id,
/// and every yielded event inserted (waiting placeholders as `Waiting`).
pub fn run_one(sim: &Simulation) -> SimResult<Option<Simulation>> {
    let Some(event_id) = sim.timeline.next_due() else {
        return Ok(None);
    };
    let mut next = sim.clone();

    // the id came out of the status map, so the record exists
    let Some(event) = next.timeline.event(event_id).cloned() else {
        return Ok(None);
    };
    next.current_time = event.scheduled_at;

    let state = resolve_state(&next, &event)?;
    trace!(
        event = %event_id,
        time = next.current_time,
        process = %state.process_type,
        step = %state.step,
        "dispatch"
    );

    let handler = {
        let definition = next.registry.definition(&event.process.process_type)?;
        definition.handler(&state.step)?.clone()
    };
    let StepOutcome { state, next: yielded } = handler(&mut next, &event, state)?;

    next.state.insert(event_id, state);
    next.timeline.mark_finished(event_id, next.current_time);
    for follow_up in yielded {
        debug!(event = %event_id, child = %follow_up.id, waiting = follow_up.waiting, at = follow_up.scheduled_at, "yielded event");
        next.schedule_event(follow_up)?;
    }
    Ok(Some(next))
}

/// Resolve the process state an event starts from.
///
/// In order: resume the event's own stored state (continuation); take the
/// parent's step when `inherit_step` is set and the types match (fork);
/// start at `initial` with the parent's data merged under the call data
/// (exec); otherwise start fresh from the call data alone (execve). A parent
/// id whose state was pruned falls through to the fresh branch.
fn resolve_state(sim: &Simulation, event: &Event) -> SimResult<ProcessState> {
    let call = &event.process;

    if let Some(existing) = sim.state.get(&event.id) {
        let data = merge_opt(&existing.data, call.data.as_ref());
        return Ok(ProcessState {
            process_type: existing.process_type.clone(),
            step: existing.step.clone(),
            data,
        });
    }

    if let Some(parent_id) = event.parent {
        match sim.state.get(&parent_id) {
            Some(parent) => {
                let data = merge_opt(&parent.data, call.data.as_ref());
                if call.inherit_step && parent.process_type == call.process_type {
                    return Ok(ProcessState {
                        process_type: call.process_type.clone(),
                        step: parent.step.clone(),
                        data,
                    });
                }
                let definition = sim.registry.definition(&call.process_type)?;
                return Ok(ProcessState::new(
                    &call.process_type,
                    definition.initial(),
                    data,
                ));
            }
            None => {
                warn!(event = %event.id, parent = %parent_id, "parent state missing, starting fresh");
            }
        }
    }

    let definition = sim.registry.definition(&call.process_type)?;
    Ok(ProcessState::new(
        &call.process_type,
        definition.initial(),
        call.data.clone().unwrap_or_default(),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::SimError;
    use crate::event::ProcessCall;
    use crate::process::ProcessDefinition;
    use serde_json::json;

    fn counter_process() -> ProcessDefinition {
        ProcessDefinition::new("counter", "tick").step("tick", |_, _, mut state| {
            let seen = state.data["seen"].as_u64().unwrap_or(0);
            state.data["seen"] = json!(seen + 1);
            Ok(StepOutcome::new(state))
        })
    }

    #[test]
    fn run_one_advances_the_clock_and_finishes_the_event() {
        let mut sim = Simulation::new();
        sim.register_process(counter_process());
        let event = Event::at(9).with_process(ProcessCall::new("counter"));
        let id = event.id;
        sim.schedule_event(event).unwrap();

        let next = run_one(&sim).unwrap().unwrap();
        assert_eq!(next.current_time, 9);
        assert!(next.is_finished(id));
        assert_eq!(next.process_state(id).unwrap().data["seen"], json!(1));
        // the input snapshot is untouched
        assert_eq!(sim.current_time, 0);
        assert!(!sim.is_finished(id));
    }

    #[test]
    fn run_one_returns_none_when_nothing_is_scheduled() {
        let sim = Simulation::new();
        assert!(run_one(&sim).unwrap().is_none());
    }

    #[test]
    fn unknown_process_type_aborts_the_step() {
        let mut sim = Simulation::new();
        sim.schedule_event(Event::at(0).with_process(ProcessCall::new("ghost")))
            .unwrap();
        let err = run_one(&sim).unwrap_err();
        assert!(matches!(err, SimError::UnknownProcessType(_)));
    }

    #[test]
    fn unknown_step_aborts_the_step() {
        let mut sim = Simulation::new();
        sim.register_process(
            ProcessDefinition::new("worker", "missing")
                .step("present", |_, _, state| Ok(StepOutcome::new(state))),
        );
        sim.schedule_event(Event::at(0).with_process(ProcessCall::new("worker")))
            .unwrap();
        let err = run_one(&sim).unwrap_err();
        assert!(matches!(err, SimError::UnknownStep { .. }));
    }

    #[test]
    fn fork_inherits_the_parent_step_and_data() {
        let mut sim = Simulation::new();
        sim.register_process(
            ProcessDefinition::new("worker", "first")
                .step("first", |_, event, state| {
                    let child = Event::at(event.scheduled_at + 1)
                        .with_parent(event.id)
                        .with_process(ProcessCall::new("worker").inheriting());
                    Ok(StepOutcome::new(state.advanced_to("second")).with_next(vec![child]))
                })
                .step("second", |_, _, mut state| {
                    state.data["reached"] = json!("second");
                    Ok(StepOutcome::new(state))
                }),
        );
        let root = Event::at(0)
            .with_process(ProcessCall::new("worker").with_data(json!({"tag": "root"})));
        sim.schedule_event(root).unwrap();

        let after_first = run_one(&sim).unwrap().unwrap();
        let after_second = run_one(&after_first).unwrap().unwrap();

        let child_id = *after_second
            .state
            .keys()
            .find(|id| after_second.process_state(**id).unwrap().data["reached"] == json!("second"))
            .unwrap();
        let child_state = after_second.process_state(child_id).unwrap();
        // the fork resumed at the parent's advanced step, with the parent data
        assert_eq!(child_state.data["tag"], json!("root"));
    }

    #[test]
    fn exec_starts_a_new_process_with_inherited_data() {
        let mut sim = Simulation::new();
        sim.register_process(
            ProcessDefinition::new("parent", "spawn").step("spawn", |_, event, state| {
                let child = Event::at(event.scheduled_at)
                    .with_parent(event.id)
                    .with_process(ProcessCall::new("child").with_data(json!({"own": true})));
                Ok(StepOutcome::new(state).with_next(vec![child]))
            }),
        );
        sim.register_process(
            ProcessDefinition::new("child", "begin").step("begin", |_, _, state| {
                Ok(StepOutcome::new(state))
            }),
        );
        sim.schedule_event(
            Event::at(0).with_process(ProcessCall::new("parent").with_data(json!({"from": "p"}))),
        )
        .unwrap();

        let mut current = sim;
        while let Some(next) = run_one(&current).unwrap() {
            current = next;
        }
        let child_state = current
            .state
            .values()
            .find(|s| s.process_type == "child")
            .unwrap();
        assert_eq!(child_state.step, "begin");
        assert_eq!(child_state.data["from"], json!("p"));
        assert_eq!(child_state.data["own"], json!(true));
    }

    #[test]
    fn dangling_parent_falls_back_to_a_fresh_process() {
        let mut sim = Simulation::new();
        sim.register_process(counter_process());
        let orphan = Event::at(0)
            .with_parent(crate::event::EventId::new())
            .with_process(ProcessCall::new("counter").inheriting());
        let id = orphan.id;
        sim.schedule_event(orphan).unwrap();

        let next = run_one(&sim).unwrap().unwrap();
        assert_eq!(next.process_state(id).unwrap().data["seen"], json!(1));
    }

    #[test]
    fn continuation_merges_call_data_over_stored_state() {
        let mut sim = Simulation::new();
        sim.register_process(
            ProcessDefinition::new("worker", "first")
                .step("first", |_, _, state| {
                    Ok(StepOutcome::new(state.advanced_to("second")))
                })
                .step("second", |_, _, state| Ok(StepOutcome::new(state))),
        );
        let first = Event::at(0)
            .with_process(ProcessCall::new("worker").with_data(json!({"a": 1, "b": 1})));
        let id = first.id;
        sim.schedule_event(first).unwrap();
        let mut current = run_one(&sim).unwrap().unwrap();

        // re-dispatching the same event id is a continuation of its state
        current.current_time = 5;
        let resumed = Event {
            id,
            ..Event::at(5).with_process(ProcessCall::new("worker").with_data(json!({"b": 2})))
        };
        current.schedule_event(resumed).unwrap();
        let after = run_one(&current).unwrap().unwrap();

        let state = after.process_state(id).unwrap();
        assert_eq!(state.step, "second");
        assert_eq!(state.data, json!({"a": 1, "b": 2}));
    }
}
