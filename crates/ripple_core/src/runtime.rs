//! The runtime aggregate
//!
//! One [`Runtime`] owns everything a reactive instance needs: the state
//! cell, the flow table, the cached evaluation order, the handler registry,
//! and the dispatch queue. Nothing is process-global, so tests and embedders
//! can hold as many isolated runtimes as they like.
//!
//! A fresh runtime is pre-seeded with the built-in `state` effect (commit
//! the proposed state), the `state` coeffect (inject the current snapshot),
//! and a `state` event handler that writes the event payload at its query
//! path through the standard chain.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::cell::AtomicCell;
use crate::error::{Result, RippleError};
use crate::flow::{FlowDefinition, FlowTable, Lifecycle};
use crate::graph::TopoCache;
use crate::interceptors::event_chain;
use crate::path::set_in;
use crate::pipeline::{Coeffects, Direction, Event, Interceptor};
use crate::queue::DispatchQueue;
use crate::value::{Path, Value};

/// A registered side-effect executor, invoked with its request payload.
pub type EffectFn = Arc<dyn Fn(&Runtime, &Value) -> Result<()> + Send + Sync>;

/// A registered coeffect injector, invoked to enrich a context's coeffects.
pub type CoeffectFn = Arc<dyn Fn(&Runtime, &mut Coeffects) -> Result<()> + Send + Sync>;

/// The error hook: called with the failure, the event being processed, and
/// the traversal phase it failed in.
pub type ErrorFn = Arc<dyn Fn(&RippleError, &Event, Direction) + Send + Sync>;

/// An event's registered interceptor chain.
pub type InterceptorChain = Arc<Vec<Interceptor>>;

/// The closed set of handler kinds the registry knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    Event,
    Fx,
    Cofx,
    Error,
}

/// All registered handlers, in one revision-stamped table so the whole
/// registry fits in an [`AtomicCell`]. Equality compares revisions only.
#[derive(Clone, Default)]
struct HandlerTable {
    revision: u64,
    events: FxHashMap<String, InterceptorChain>,
    fx: FxHashMap<String, EffectFn>,
    cofx: FxHashMap<String, CoeffectFn>,
    error: Option<ErrorFn>,
}

impl PartialEq for HandlerTable {
    fn eq(&self, other: &Self) -> bool {
        self.revision == other.revision
    }
}

/// An isolated reactive runtime instance.
pub struct Runtime {
    state: AtomicCell<Value>,
    flows: AtomicCell<FlowTable>,
    topo: AtomicCell<TopoCache>,
    handlers: AtomicCell<HandlerTable>,
    queue: DispatchQueue,
}

impl Runtime {
    /// A runtime seeded with `state`, with the built-in `state`
    /// effect/coeffect/event handlers installed.
    pub fn new(state: Value) -> Self {
        let rt = Self {
            state: AtomicCell::new(state),
            flows: AtomicCell::new(FlowTable::new()),
            topo: AtomicCell::new(None),
            handlers: AtomicCell::new(HandlerTable::default()),
            queue: DispatchQueue::new(),
        };

        rt.register_fx("state", |rt, proposed| {
            rt.state.swap(|current| {
                if current == proposed {
                    current.clone()
                } else {
                    proposed.clone()
                }
            });
            Ok(())
        });
        rt.register_cofx("state", |rt, coeffects| {
            coeffects.state = Some(rt.read_state());
            Ok(())
        });
        // the built-in state event: write the payload at the query path
        rt.register_event("state", |state, query, payload| {
            Ok(Some(set_in(state, query, payload.clone())?))
        })
        .expect("built-in state handler is well-formed");

        rt
    }

    /// Enqueue an event and run it (and anything it enqueues) to completion
    /// on this thread, unless another thread already owns the drain.
    pub fn dispatch(&self, handler_id: impl Into<String>, query: Path, payload: impl Into<Value>) {
        self.queue
            .dispatch(self, Event::new(handler_id, query, payload.into()));
    }

    /// Snapshot of the whole state value.
    pub fn read_state(&self) -> Value {
        self.state.get()
    }

    /// Snapshot read at a path inside the state.
    pub fn read_at(&self, path: &[String]) -> Option<Value> {
        crate::path::get_in(&self.state.get(), path).cloned()
    }

    /// Snapshot read of a flow's output location. `None` for an undeclared
    /// flow or one that has not written yet.
    pub fn subscribe(&self, flow_id: &str) -> Option<Value> {
        let path = self.flows.get().flow_path(flow_id).cloned()?;
        self.read_at(&path)
    }

    /// Declare (or re-declare) a flow. It activates on the next event.
    pub fn register_flow(&self, def: FlowDefinition) {
        tracing::debug!(flow = %def.id(), "registering flow");
        self.flows.swap(|t| {
            let mut t = t.clone();
            t.insert(def.clone());
            t
        });
    }

    /// Logically retract a flow; its removal output applies on the next
    /// event. Returns false for an unknown or already-retired id.
    pub fn remove_flow(&self, id: &str) -> bool {
        let known = self
            .flows
            .get()
            .get(id)
            .is_some_and(|def| def.lifecycle() != Lifecycle::Retired);
        if known {
            tracing::debug!(flow = %id, "removing flow");
            self.flows.swap(|t| {
                let mut t = t.clone();
                t.mark_removed(id);
                t
            });
        }
        known
    }

    /// Register an event's full interceptor chain, terminal handler last.
    pub fn register_event_handler(
        &self,
        id: impl Into<String>,
        chain: Vec<Interceptor>,
    ) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(RippleError::declaration("", "event handlers require an id"));
        }
        if chain.is_empty() {
            return Err(RippleError::declaration(
                &id,
                "event handlers require at least one interceptor",
            ));
        }
        tracing::debug!(kind = ?HandlerKind::Event, id = %id, steps = chain.len(), "registered handler");
        let chain = Arc::new(chain);
        self.handlers.swap(|t| {
            let mut t = t.clone();
            t.events.insert(id.clone(), chain.clone());
            t.revision += 1;
            t
        });
        Ok(())
    }

    /// Register a state-updating event handler on the standard chain.
    pub fn register_event<F>(&self, id: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(&Value, &Path, &Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        let id = id.into();
        self.register_event_handler(id, event_chain(f))
    }

    /// Register a side-effect executor under `id`.
    pub fn register_fx(
        &self,
        id: impl Into<String>,
        f: impl Fn(&Runtime, &Value) -> Result<()> + Send + Sync + 'static,
    ) {
        let id = id.into();
        tracing::debug!(kind = ?HandlerKind::Fx, id = %id, "registered handler");
        let f: EffectFn = Arc::new(f);
        self.handlers.swap(|t| {
            let mut t = t.clone();
            t.fx.insert(id.clone(), f.clone());
            t.revision += 1;
            t
        });
    }

    /// Register a coeffect injector under `id`.
    pub fn register_cofx(
        &self,
        id: impl Into<String>,
        f: impl Fn(&Runtime, &mut Coeffects) -> Result<()> + Send + Sync + 'static,
    ) {
        let id = id.into();
        tracing::debug!(kind = ?HandlerKind::Cofx, id = %id, "registered handler");
        let f: CoeffectFn = Arc::new(f);
        self.handlers.swap(|t| {
            let mut t = t.clone();
            t.cofx.insert(id.clone(), f.clone());
            t.revision += 1;
            t
        });
    }

    /// Replace the error hook. Without one, failures are logged.
    pub fn set_error_handler(
        &self,
        f: impl Fn(&RippleError, &Event, Direction) + Send + Sync + 'static,
    ) {
        tracing::debug!(kind = ?HandlerKind::Error, "registered handler");
        let f: ErrorFn = Arc::new(f);
        self.handlers.swap(|t| {
            let mut t = t.clone();
            t.error = Some(f.clone());
            t.revision += 1;
            t
        });
    }

    /// The interceptor chain registered for an event id.
    pub fn lookup_event_handler(&self, id: &str) -> Option<InterceptorChain> {
        self.handlers.get().events.get(id).cloned()
    }

    pub(crate) fn lookup_fx(&self, id: &str) -> Option<EffectFn> {
        self.handlers.get().fx.get(id).cloned()
    }

    pub(crate) fn lookup_cofx(&self, id: &str) -> Option<CoeffectFn> {
        self.handlers.get().cofx.get(id).cloned()
    }

    pub(crate) fn report_error(&self, err: &RippleError, event: &Event, direction: Direction) {
        match self.handlers.get().error {
            Some(hook) => (*hook)(err, event, direction),
            None => tracing::error!(
                event = %event.handler_id,
                ?direction,
                error = %err,
                "unhandled event processing error"
            ),
        }
    }

    pub(crate) fn flows(&self) -> &AtomicCell<FlowTable> {
        &self.flows
    }

    pub(crate) fn topo_cache(&self) -> &AtomicCell<TopoCache> {
        &self.topo
    }

    pub(crate) fn state_cell(&self) -> &AtomicCell<Value> {
        &self.state
    }

    pub(crate) fn queue(&self) -> &DispatchQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{InputRef, ResolvedInputs};
    use crate::path::get_in_or;
    use crate::pipeline::EffectRequest;
    use crate::{path, vmap};
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn seed() -> Value {
        vmap! {
            "count" => 43,
            "devil" => vmap! { "beast" => 666, "adjesus" => 623 },
        }
    }

    fn register_gospel_flows(rt: &Runtime) {
        let jesus = FlowDefinition::builder("jesus")
            .input("count", InputRef::state(["count"]))
            .input("number", InputRef::state(["devil", "beast"]))
            .input("adjust", InputRef::state(["devil", "adjesus"]))
            .output(|i: &ResolvedInputs| {
                if i.int("number") == 666 {
                    Value::Int(i.int("number") - i.int("adjust"))
                } else {
                    Value::Int(i.int("count") + i.int("adjust"))
                }
            })
            .build()
            .unwrap();
        let saves = FlowDefinition::builder("jesus_saves")
            .input("j", InputRef::flow("jesus"))
            .output(|i: &ResolvedInputs| Value::Int(i.int("j") * 2))
            .build()
            .unwrap();
        let saves_2 = FlowDefinition::builder("jesus_saves_2")
            .input("j", InputRef::flow("jesus"))
            .output(|i: &ResolvedInputs| Value::Int(i.int("j") * 3))
            .build()
            .unwrap();
        rt.register_flow(jesus);
        rt.register_flow(saves);
        rt.register_flow(saves_2);
    }

    #[test]
    fn test_builtin_state_event_commits_payload() {
        let rt = Runtime::new(seed());
        rt.dispatch("state", path!["count"], 99);
        assert_eq!(rt.read_at(&path!["count"]), Some(Value::Int(99)));
        // untouched subtree survives
        assert_eq!(rt.read_at(&path!["devil", "beast"]), Some(Value::Int(666)));
    }

    #[test]
    fn test_nan_payload_dispatch_runs_to_completion() {
        // every mutation path is a CAS loop comparing a value against its
        // own clone; a NaN leaf must not be able to stall those loops
        let rt = Runtime::new(seed());
        rt.dispatch("state", path!["measure"], f64::NAN);

        assert!(rt.queue().is_empty());
        let committed = rt.read_at(&path!["measure"]).unwrap();
        assert!(committed.as_f64().unwrap().is_nan());

        // and a later event over the NaN-bearing state still commits
        rt.dispatch("state", path!["count"], 5);
        assert_eq!(rt.read_at(&path!["count"]), Some(Value::Int(5)));
    }

    #[test]
    fn test_flow_chain_evaluates_and_reevaluates() {
        let rt = Runtime::new(seed());
        register_gospel_flows(&rt);

        // nothing written before the first event
        assert_eq!(rt.subscribe("jesus"), None);

        // first event activates the whole chain: beast is 666, so jesus
        // takes the 666 - 623 branch
        rt.dispatch("state", path!["count"], 1);
        assert_eq!(rt.subscribe("jesus"), Some(Value::Int(43)));
        assert_eq!(rt.read_at(&path!["jesus_saves"]), Some(Value::Int(86)));
        assert_eq!(rt.read_at(&path!["jesus_saves_2"]), Some(Value::Int(129)));

        // beast leaves 666: jesus flips to count + adjust = 1 + 623
        rt.dispatch("state", path!["devil", "beast"], 1);
        assert_eq!(rt.read_at(&path!["jesus"]), Some(Value::Int(624)));
        assert_eq!(rt.read_at(&path!["jesus_saves"]), Some(Value::Int(1248)));
        assert_eq!(rt.read_at(&path!["jesus_saves_2"]), Some(Value::Int(1872)));
    }

    #[test]
    fn test_removed_flow_clears_output_once() {
        let rt = Runtime::new(seed());
        register_gospel_flows(&rt);
        rt.dispatch("state", path!["count"], 1);
        assert_eq!(rt.read_at(&path!["jesus_saves_2"]), Some(Value::Int(129)));

        assert!(rt.remove_flow("jesus_saves_2"));
        assert!(!rt.remove_flow("no-such-flow"));
        rt.dispatch("state", path!["count"], 2);
        assert_eq!(rt.read_at(&path!["jesus_saves_2"]), Some(Value::Null));

        // a later write over the cleared path is not clobbered again
        rt.dispatch("state", path!["jesus_saves_2"], 7);
        assert_eq!(rt.read_at(&path!["jesus_saves_2"]), Some(Value::Int(7)));
    }

    #[test]
    fn test_handler_error_is_isolated() {
        let rt = Runtime::new(seed());
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        rt.set_error_handler(move |_, event, _| {
            sink.lock().unwrap().push(event.handler_id.clone());
        });
        rt.register_event("bad", |_, _, _| {
            Err(RippleError::handler("bad", "refuses to cooperate"))
        })
        .unwrap();

        rt.dispatch("bad", path![], Value::Null);
        rt.dispatch("state", path!["count"], 5);

        // the failing event was reported and did not block the next one
        assert_eq!(*reported.lock().unwrap(), ["bad"]);
        assert_eq!(rt.read_at(&path!["count"]), Some(Value::Int(5)));
    }

    #[test]
    fn test_registration_validation() {
        let rt = Runtime::new(seed());
        assert!(rt.register_event_handler("", vec![Interceptor::new("x")]).is_err());
        assert!(rt.register_event_handler("empty", Vec::new()).is_err());
    }

    #[test]
    fn test_flow_registered_from_handler_activates_same_event() {
        let rt = Runtime::new(seed());
        let double = FlowDefinition::builder("double")
            .input("n", InputRef::state(["count"]))
            .output(|i: &ResolvedInputs| Value::Int(i.int("n") * 2))
            .build()
            .unwrap();

        let mut chain = event_chain(|state, query, payload| {
            Ok(Some(set_in(state, query, payload.clone())?))
        });
        let declare = Interceptor::new("declare-flow").before(move |_, mut ctx| {
            ctx.push_effect(EffectRequest::RegisterFlow(double.clone()));
            Ok(ctx)
        });
        // ahead of the terminal handler, behind the machinery
        let terminal = chain.pop().unwrap();
        chain.push(declare);
        chain.push(terminal);
        rt.register_event_handler("with-flow", chain).unwrap();

        rt.dispatch("with-flow", path!["count"], 10);
        assert_eq!(rt.read_at(&path!["count"]), Some(Value::Int(10)));
        assert_eq!(rt.read_at(&path!["double"]), Some(Value::Int(20)));
    }

    #[test]
    fn test_concurrent_dispatch_loses_no_events() {
        let rt = Runtime::new(vmap! { "count" => 0 });
        rt.register_event("inc", |state, _, _| {
            let n = get_in_or(state, &path!["count"], Value::Int(0))
                .as_i64()
                .unwrap_or(0);
            Ok(Some(set_in(state, &path!["count"], Value::Int(n + 1))?))
        })
        .unwrap();

        let threads: i64 = 4;
        let per_thread: i64 = 25;
        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    for _ in 0..per_thread {
                        rt.dispatch("inc", path![], Value::Null);
                    }
                });
            }
        });

        // all drains have completed when scope exits
        assert!(rt.queue().is_empty());
        assert_eq!(
            rt.read_at(&path!["count"]),
            Some(Value::Int(threads * per_thread))
        );
    }

    #[test]
    fn test_isolated_runtimes_do_not_share_state() {
        let a = Runtime::new(vmap! { "count" => 1 });
        let b = Runtime::new(vmap! { "count" => 2 });
        a.dispatch("state", path!["count"], 10);
        assert_eq!(a.read_at(&path!["count"]), Some(Value::Int(10)));
        assert_eq!(b.read_at(&path!["count"]), Some(Value::Int(2)));
    }
}
