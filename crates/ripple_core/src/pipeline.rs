//! Interceptor pipeline
//!
//! Each event is processed by walking an ordered chain of interceptors
//! forward (`before` steps) and then backward (`after` steps), threading a
//! [`Context`] through every step. The terminal event handler is wired in as
//! the last interceptor's `before` step, so its proposed effects are visible
//! to every earlier interceptor's `after` step. That is how the flow graph,
//! the commit step, and the audit diff all observe the handler's output.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::flow::FlowDefinition;
use crate::runtime::Runtime;
use crate::value::{Path, Value};

/// An immutable dispatched event: handler id, query path, payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub handler_id: String,
    pub query: Path,
    pub payload: Value,
}

impl Event {
    pub fn new(handler_id: impl Into<String>, query: Path, payload: Value) -> Self {
        Self {
            handler_id: handler_id.into(),
            query,
            payload,
        }
    }
}

/// Read-only inputs available to a handler: the event and whatever the
/// coeffect interceptors injected (the built-in `state` coeffect snapshots
/// the current state here).
#[derive(Clone, Debug)]
pub struct Coeffects {
    pub event: Event,
    pub original_event: Event,
    pub state: Option<Value>,
    /// Additional injected coeffects, keyed by coeffect id
    pub extra: FxHashMap<String, Value>,
}

impl Coeffects {
    fn new(event: Event) -> Self {
        Self {
            original_event: event.clone(),
            event,
            state: None,
            extra: FxHashMap::default(),
        }
    }
}

/// A side-effect request proposed by a handler or interceptor.
#[derive(Clone, Debug)]
pub enum EffectRequest {
    /// Declare (or re-declare) a flow before the graph is evaluated
    RegisterFlow(FlowDefinition),
    /// Logically retract a flow
    RemoveFlow(String),
    /// Any other effect, executed by the handler registered under `id`
    Custom { id: String, payload: Value },
}

/// The handler's proposed outputs before commit.
#[derive(Clone, Debug, Default)]
pub struct Effects {
    /// Candidate new state; committed by the `do_fx` interceptor
    pub state: Option<Value>,
    /// The proposed state as it stood before flow evaluation
    pub pre_flow_state: Option<Value>,
    /// Pending side-effect requests, in request order
    pub fx: Vec<EffectRequest>,
}

/// Per-event processing record threaded through the interceptor chain.
#[derive(Clone, Debug)]
pub struct Context {
    pub coeffects: Coeffects,
    pub effects: Effects,
    /// Interceptors not yet run; front is the next `before` step
    pub queue: VecDeque<Interceptor>,
    /// Interceptors already run; front is the next `after` step
    pub stack: VecDeque<Interceptor>,
}

impl Context {
    /// Fresh context for one event and its interceptor chain.
    pub fn new(event: Event, interceptors: &[Interceptor]) -> Self {
        Self {
            coeffects: Coeffects::new(event),
            effects: Effects::default(),
            queue: interceptors.iter().cloned().collect(),
            stack: VecDeque::new(),
        }
    }

    /// Queue a side-effect request for the `after` phase effect handlers.
    pub fn push_effect(&mut self, fx: EffectRequest) {
        self.effects.fx.push(fx);
    }
}

/// Which traversal phase a step ran in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Before,
    After,
}

/// An interceptor step: receives the context, returns the (possibly
/// replaced) context.
pub type InterceptorFn = Arc<dyn Fn(&Runtime, Context) -> Result<Context> + Send + Sync>;

/// A named pair of optional before/after steps.
#[derive(Clone)]
pub struct Interceptor {
    id: &'static str,
    before: Option<InterceptorFn>,
    after: Option<InterceptorFn>,
}

impl Interceptor {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            before: None,
            after: None,
        }
    }

    pub fn before(
        mut self,
        f: impl Fn(&Runtime, Context) -> Result<Context> + Send + Sync + 'static,
    ) -> Self {
        self.before = Some(Arc::new(f));
        self
    }

    pub fn after(
        mut self,
        f: impl Fn(&Runtime, Context) -> Result<Context> + Send + Sync + 'static,
    ) -> Self {
        self.after = Some(Arc::new(f));
        self
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    fn step(&self, direction: Direction) -> Option<&InterceptorFn> {
        match direction {
            Direction::Before => self.before.as_ref(),
            Direction::After => self.after.as_ref(),
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("id", &self.id)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// Run both traversal phases for one event.
///
/// A failing step is forwarded to the runtime's error hook together with the
/// event and the phase, and processing of that event stops there;
/// already-applied effects are not rolled back. Returns the final context,
/// or `None` if the event was aborted.
pub fn run(rt: &Runtime, ctx: Context) -> Option<Context> {
    let ctx = exec_phase(rt, ctx, Direction::Before)?;
    exec_phase(rt, ctx, Direction::After)
}

fn exec_phase(rt: &Runtime, mut ctx: Context, direction: Direction) -> Option<Context> {
    loop {
        let interceptor = match direction {
            Direction::Before => {
                let Some(next) = ctx.queue.pop_front() else {
                    return Some(ctx);
                };
                ctx.stack.push_front(next.clone());
                next
            }
            Direction::After => {
                let Some(next) = ctx.stack.pop_front() else {
                    return Some(ctx);
                };
                next
            }
        };

        if let Some(step) = interceptor.step(direction).cloned() {
            let event = ctx.coeffects.event.clone();
            match (*step)(rt, ctx) {
                Ok(next_ctx) => ctx = next_ctx,
                Err(err) => {
                    tracing::warn!(
                        interceptor = interceptor.id(),
                        ?direction,
                        error = %err,
                        "interceptor failed; aborting event"
                    );
                    rt.report_error(&err, &event, direction);
                    return None;
                }
            }
        }
    }
}
