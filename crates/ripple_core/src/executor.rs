//! Flow graph evaluation
//!
//! [`run_graph`] walks the declared flows in topological order and threads an
//! accumulator state through them, so each flow sees the outputs of the flows
//! it depends on. For every flow it compares activation before the event
//! (against the pre-event state) with activation after it (against the
//! accumulated proposed state) and reacts to the transition: activations
//! compute and write the output, deactivations and retractions apply the
//! removal output, and a flow that stays active recomputes only when its
//! resolved inputs actually changed.

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::flow::{FlowDefinition, FlowTable, InputRef, Lifecycle, ResolvedInputs};
use crate::graph::resolve_order;
use crate::path::{get_in_or, set_in};
use crate::pipeline::Context;
use crate::runtime::Runtime;
use crate::value::Value;

/// Activation of one flow on one side of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FlowPhase {
    /// Declared but never yet activated (before side only)
    New,
    Inactive,
    Active,
    /// Logically retracted (after side only)
    Removed,
}

fn resolve(
    table: &FlowTable,
    refs: &FxHashMap<String, InputRef>,
    state: &Value,
) -> ResolvedInputs {
    let mut resolved = ResolvedInputs::default();
    for (name, input) in refs {
        let value = match input {
            InputRef::State(path) => get_in_or(state, path, Value::Null),
            InputRef::Flow(id) => table
                .flow_path(id)
                .map(|path| get_in_or(state, path, Value::Null))
                .unwrap_or(Value::Null),
        };
        resolved.insert(name.clone(), value);
    }
    resolved
}

/// The predicate sees exactly the declared activation inputs, resolved
/// against `state`. With none declared it sees an empty set, so its verdict
/// cannot depend on the flow's data inputs.
fn is_active(table: &FlowTable, def: &FlowDefinition, state: &Value) -> bool {
    def.is_active
        .is_active(&resolve(table, &def.active_inputs, state))
}

fn phase_before(table: &FlowTable, def: &FlowDefinition, state: &Value) -> FlowPhase {
    if def.is_new() {
        FlowPhase::New
    } else if is_active(table, def, state) {
        FlowPhase::Active
    } else {
        FlowPhase::Inactive
    }
}

fn phase_after(table: &FlowTable, def: &FlowDefinition, state: &Value) -> FlowPhase {
    if def.lifecycle() == Lifecycle::Removed {
        FlowPhase::Removed
    } else if is_active(table, def, state) {
        FlowPhase::Active
    } else {
        FlowPhase::Inactive
    }
}

/// Evaluate the flow graph against the context's proposed state and replace
/// `effects.state` with the settled result.
///
/// The pre-event state comes from the injected state coeffect; the starting
/// accumulator is the handler's proposed state, falling back to the pre-event
/// state when the handler proposed none.
pub fn run_graph(rt: &Runtime, mut ctx: Context) -> Result<Context> {
    let table = rt.flows().get();
    if table.is_empty() {
        return Ok(ctx);
    }
    let order = resolve_order(&table, rt.topo_cache())?;

    let old_state = match &ctx.coeffects.state {
        Some(state) => state.clone(),
        None => rt.read_state(),
    };
    let mut n_state = ctx.effects.state.clone().unwrap_or_else(|| old_state.clone());
    let mut settled: Vec<(String, Lifecycle)> = Vec::new();

    for id in order.iter() {
        let Some(def) = table.get(id) else { continue };
        if def.lifecycle() == Lifecycle::Retired {
            continue;
        }

        let before = phase_before(&table, def, &old_state);
        let after = phase_after(&table, def, &n_state);
        tracing::trace!(flow = %id, ?before, ?after, "flow transition");

        match (before, after) {
            // retraction: removal output runs once, then the flow is retired
            (_, FlowPhase::Removed) => {
                if before == FlowPhase::Active {
                    n_state = def.remove.on_remove(&n_state, def.path());
                }
                settled.push((id.clone(), Lifecycle::Retired));
            }
            // first activation
            (FlowPhase::New, FlowPhase::Active) => {
                let inputs = resolve(&table, &def.inputs, &n_state);
                n_state = set_in(&n_state, def.path(), def.output.compute(&inputs))?;
                settled.push((id.clone(), Lifecycle::Live));
            }
            // reactivation commits the output even if inputs are unchanged,
            // since the previous deactivation cleared it
            (FlowPhase::Inactive, FlowPhase::Active) => {
                let inputs = resolve(&table, &def.inputs, &n_state);
                n_state = set_in(&n_state, def.path(), def.output.compute(&inputs))?;
            }
            // steady state: recompute only when the inputs moved
            (FlowPhase::Active, FlowPhase::Active) => {
                let old_inputs = resolve(&table, &def.inputs, &old_state);
                let new_inputs = resolve(&table, &def.inputs, &n_state);
                if old_inputs != new_inputs {
                    n_state = set_in(&n_state, def.path(), def.output.compute(&new_inputs))?;
                }
            }
            (FlowPhase::Active, FlowPhase::Inactive) => {
                n_state = def.remove.on_remove(&n_state, def.path());
            }
            // never-activated or inactive flows staying inactive
            _ => {}
        }
    }

    if !settled.is_empty() {
        rt.flows().swap(|t| {
            let mut t = t.clone();
            for (id, lifecycle) in &settled {
                t.settle(id, *lifecycle);
            }
            t
        });
    }

    ctx.effects.state = Some(n_state);
    Ok(ctx)
}
