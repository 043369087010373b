//! Ripple Core Runtime
//!
//! This crate provides an embeddable reactive runtime:
//!
//! - **Atomic State**: One immutable nested value behind a compare-and-swap
//!   cell; every mutation is a whole-value replacement
//! - **Events**: Dispatched into a run-to-completion queue and processed
//!   through a composable interceptor pipeline
//! - **Flows**: Declared derived values, recomputed in dependency order with
//!   activation, recompute-on-change, and removal semantics
//!
//! # Example
//!
//! ```rust
//! use ripple_core::flow::{FlowDefinition, InputRef, ResolvedInputs};
//! use ripple_core::runtime::Runtime;
//! use ripple_core::value::Value;
//! use ripple_core::{path, vmap};
//!
//! let rt = Runtime::new(vmap! { "count" => 2 });
//!
//! // a derived value, recomputed whenever "count" changes
//! let double = FlowDefinition::builder("double")
//!     .input("n", InputRef::state(["count"]))
//!     .output(|inputs: &ResolvedInputs| Value::Int(inputs.int("n") * 2))
//!     .build()
//!     .unwrap();
//! rt.register_flow(double);
//!
//! // the built-in "state" event writes the payload at the query path,
//! // then the flow graph settles before commit
//! rt.dispatch("state", path!["count"], 5);
//! assert_eq!(rt.read_at(&path!["count"]), Some(Value::Int(5)));
//! assert_eq!(rt.read_at(&path!["double"]), Some(Value::Int(10)));
//! ```

pub mod cell;
pub mod error;
pub mod executor;
pub mod flow;
pub mod graph;
pub mod interceptors;
pub mod path;
pub mod pipeline;
pub mod queue;
pub mod runtime;
pub mod value;

pub use cell::AtomicCell;
pub use error::{Result, RippleError};
pub use flow::{
    ActivePredicate, FlowBuilder, FlowDefinition, FlowOutput, FlowTable, InputRef, Lifecycle,
    RemoveOutput, ResolvedInputs,
};
pub use graph::{build_graph, topological_order, DependencyGraph, TopoCache};
pub use interceptors::{
    debug, do_flow_fx, do_fx, event_chain, flow_graph, inject_cofx, state_handler,
};
pub use path::{delete_in, diff, get_in, get_in_or, set_in, ChangedEntry, DiffEntry, StateDiff};
pub use pipeline::{
    Coeffects, Context, Direction, EffectRequest, Effects, Event, Interceptor, InterceptorFn,
};
pub use queue::DispatchQueue;
pub use runtime::{CoeffectFn, EffectFn, ErrorFn, HandlerKind, InterceptorChain, Runtime};
pub use value::{Path, Value};
