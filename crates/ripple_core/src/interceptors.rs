//! Built-in interceptors and the standard event chain
//!
//! [`event_chain`] assembles the chain every state-updating event runs
//! through. Reading it forward gives the `before` order; the `after` steps
//! run in reverse, so the full walk is:
//!
//! ```text
//! inject_cofx(state) -> state_handler -> do_flow_fx -> flow_graph
//!                    -> debug -> do_fx
//! ```
//!
//! The handler proposes a state, flow declarations from its effects are
//! applied, the flow graph settles the proposal, the diff is logged, and
//! `do_fx` commits the result and executes the remaining side effects.

use crate::error::Result;
use crate::executor;
use crate::path::diff;
use crate::pipeline::{Context, EffectRequest, Interceptor};
use crate::runtime::Runtime;
use crate::value::{Path, Value};

/// Inject the coeffect registered under `id` into the context.
///
/// An unregistered id is skipped with a warning; handlers read missing
/// coeffects as absent rather than failing the event.
pub fn inject_cofx(id: &'static str) -> Interceptor {
    Interceptor::new("inject-cofx").before(move |rt, mut ctx| {
        match rt.lookup_cofx(id) {
            Some(cofx) => (*cofx)(rt, &mut ctx.coeffects)?,
            None => tracing::warn!(cofx = id, "no such coeffect registered"),
        }
        Ok(ctx)
    })
}

/// Execute the accumulated effects: the state effect first, then the rest in
/// request order. Unknown effect ids are logged and skipped.
pub fn do_fx() -> Interceptor {
    Interceptor::new("do-fx").after(|rt, mut ctx| {
        if let Some(state) = ctx.effects.state.take() {
            match rt.lookup_fx("state") {
                Some(fx) => (*fx)(rt, &state)?,
                None => tracing::warn!("no state effect registered"),
            }
            ctx.effects.state = Some(state);
        }
        for request in std::mem::take(&mut ctx.effects.fx) {
            match request {
                EffectRequest::RegisterFlow(def) => rt.register_flow(def),
                EffectRequest::RemoveFlow(id) => {
                    rt.remove_flow(&id);
                }
                EffectRequest::Custom { id, payload } => match rt.lookup_fx(&id) {
                    Some(fx) => (*fx)(rt, &payload)?,
                    None => tracing::warn!(fx = %id, "no such effect registered"),
                },
            }
        }
        Ok(ctx)
    })
}

/// Apply flow registrations and retractions requested by the handler, ahead
/// of graph evaluation. Other effect requests stay queued for [`do_fx`].
pub fn do_flow_fx() -> Interceptor {
    Interceptor::new("do-flow-fx").after(|rt, mut ctx| {
        let mut rest = Vec::with_capacity(ctx.effects.fx.len());
        for request in std::mem::take(&mut ctx.effects.fx) {
            match request {
                EffectRequest::RegisterFlow(def) => rt.register_flow(def),
                EffectRequest::RemoveFlow(id) => {
                    rt.remove_flow(&id);
                }
                other => rest.push(other),
            }
        }
        ctx.effects.fx = rest;
        Ok(ctx)
    })
}

/// Evaluate the flow graph against the proposed state, keeping the
/// pre-evaluation proposal in `effects.pre_flow_state`.
pub fn flow_graph() -> Interceptor {
    Interceptor::new("flow-graph").after(|rt, mut ctx| {
        ctx.effects.pre_flow_state = ctx.effects.state.clone();
        executor::run_graph(rt, ctx)
    })
}

/// Log the structural state difference the event produced.
pub fn debug() -> Interceptor {
    Interceptor::new("debug").after(|_, ctx: Context| {
        if let (Some(old), Some(new)) = (&ctx.coeffects.state, &ctx.effects.state) {
            let d = diff(old, new);
            if d.is_changed() {
                for entry in &d.common_changed {
                    tracing::debug!(
                        event = %ctx.coeffects.event.handler_id,
                        path = ?entry.path,
                        old = ?entry.old,
                        new = ?entry.new,
                        "state changed"
                    );
                }
                for entry in &d.only_new {
                    tracing::debug!(
                        event = %ctx.coeffects.event.handler_id,
                        path = ?entry.path,
                        new = ?entry.value,
                        "state added"
                    );
                }
                for entry in &d.only_old {
                    tracing::debug!(
                        event = %ctx.coeffects.event.handler_id,
                        path = ?entry.path,
                        old = ?entry.value,
                        "state removed"
                    );
                }
            } else {
                tracing::debug!(
                    event = %ctx.coeffects.event.handler_id,
                    "event produced no state change"
                );
            }
        }
        Ok(ctx)
    })
}

/// Terminal interceptor: call the handler with the injected state snapshot,
/// the event's query path, and its payload; a `Some` return becomes the
/// proposed state.
pub fn state_handler<F>(f: F) -> Interceptor
where
    F: Fn(&Value, &Path, &Value) -> Result<Option<Value>> + Send + Sync + 'static,
{
    Interceptor::new("state-handler").before(move |rt, mut ctx| {
        let state = match &ctx.coeffects.state {
            Some(state) => state.clone(),
            None => rt.read_state(),
        };
        if let Some(proposed) = f(&state, &ctx.coeffects.event.query, &ctx.coeffects.event.payload)?
        {
            ctx.effects.state = Some(proposed);
        }
        Ok(ctx)
    })
}

/// The standard chain for a state-updating event handler.
pub fn event_chain<F>(f: F) -> Vec<Interceptor>
where
    F: Fn(&Value, &Path, &Value) -> Result<Option<Value>> + Send + Sync + 'static,
{
    vec![
        inject_cofx("state"),
        do_fx(),
        debug(),
        flow_graph(),
        do_flow_fx(),
        state_handler(f),
    ]
}
