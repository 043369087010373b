//! Flow definitions and the declaration table
//!
//! A flow declares one derived value: where its output is written, which
//! state paths or other flows feed it, when it is active, and what to write
//! when it is deactivated. User-supplied logic enters through three
//! capability traits ([`FlowOutput`], [`ActivePredicate`], [`RemoveOutput`]),
//! each blanket-implemented for plain closures.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RippleError};
use crate::path::set_in;
use crate::value::{Path, Value};

static NULL: Value = Value::Null;

/// One declared input: a state path or another flow's output.
#[derive(Clone, Debug, PartialEq)]
pub enum InputRef {
    /// Read directly from state at this path
    State(Path),
    /// Read the referenced flow's output location in state
    Flow(String),
}

impl InputRef {
    /// A state-path reference.
    pub fn state<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InputRef::State(keys.into_iter().map(Into::into).collect())
    }

    /// A reference to another flow by id.
    pub fn flow(id: impl Into<String>) -> Self {
        InputRef::Flow(id.into())
    }
}

/// Resolved input values for one flow, keyed by local input name.
///
/// Compared wholesale to decide whether a flow's inputs changed between the
/// pre-event and proposed states.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedInputs {
    values: BTreeMap<String, Value>,
}

impl ResolvedInputs {
    pub(crate) fn insert(&mut self, name: String, value: Value) {
        self.values.insert(name, value);
    }

    /// The resolved value for `name`, or Null if absent.
    pub fn get(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&NULL)
    }

    /// Integer convenience accessor; Null/non-numeric inputs read as 0.
    pub fn int(&self, name: &str) -> i64 {
        self.get(name).as_i64().unwrap_or(0)
    }

    /// Float convenience accessor; Null/non-numeric inputs read as 0.0.
    pub fn num(&self, name: &str) -> f64 {
        self.get(name).as_f64().unwrap_or(0.0)
    }
}

/// Produces a flow's output value from its resolved inputs.
pub trait FlowOutput: Send + Sync {
    fn compute(&self, inputs: &ResolvedInputs) -> Value;
}

impl<F> FlowOutput for F
where
    F: Fn(&ResolvedInputs) -> Value + Send + Sync,
{
    fn compute(&self, inputs: &ResolvedInputs) -> Value {
        self(inputs)
    }
}

/// Decides whether a flow is active, given its resolved activation inputs.
pub trait ActivePredicate: Send + Sync {
    fn is_active(&self, inputs: &ResolvedInputs) -> bool;
}

impl<F> ActivePredicate for F
where
    F: Fn(&ResolvedInputs) -> bool + Send + Sync,
{
    fn is_active(&self, inputs: &ResolvedInputs) -> bool {
        self(inputs)
    }
}

/// Produces the state to keep when a flow is deactivated or retracted.
pub trait RemoveOutput: Send + Sync {
    fn on_remove(&self, state: &Value, path: &Path) -> Value;
}

impl<F> RemoveOutput for F
where
    F: Fn(&Value, &Path) -> Value + Send + Sync,
{
    fn on_remove(&self, state: &Value, path: &Path) -> Value {
        self(state, path)
    }
}

/// Where a flow is in its activation lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Declared but never activated
    New,
    /// Has activated at least once
    Live,
    /// Logically retracted; removal output not yet applied
    Removed,
    /// Retracted and removal applied; skipped by the executor
    Retired,
}

/// One declared derived value.
#[derive(Clone)]
pub struct FlowDefinition {
    pub(crate) id: String,
    pub(crate) path: Path,
    pub(crate) inputs: FxHashMap<String, InputRef>,
    pub(crate) active_inputs: FxHashMap<String, InputRef>,
    pub(crate) is_active: Arc<dyn ActivePredicate>,
    pub(crate) output: Arc<dyn FlowOutput>,
    pub(crate) remove: Arc<dyn RemoveOutput>,
    pub(crate) lifecycle: Lifecycle,
}

impl FlowDefinition {
    /// Start declaring a flow with the given id.
    pub fn builder(id: impl Into<String>) -> FlowBuilder {
        FlowBuilder {
            id: id.into(),
            path: None,
            inputs: FxHashMap::default(),
            active_inputs: FxHashMap::default(),
            is_active: None,
            output: None,
            remove: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where this flow's output is written in state.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// True until the first successful activation.
    pub fn is_new(&self) -> bool {
        self.lifecycle == Lifecycle::New
    }

    /// True once the flow has been logically retracted.
    pub fn is_removed(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Removed | Lifecycle::Retired)
    }

    /// Declared inputs merged with activation inputs; activation entries win
    /// on a name collision.
    pub(crate) fn merged_inputs(&self) -> FxHashMap<String, InputRef> {
        let mut merged = self.inputs.clone();
        merged.extend(
            self.active_inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged
    }
}

impl fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("inputs", &self.inputs)
            .field("active_inputs", &self.active_inputs)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FlowDefinition`]; validation happens at [`FlowBuilder::build`].
pub struct FlowBuilder {
    id: String,
    path: Option<Path>,
    inputs: FxHashMap<String, InputRef>,
    active_inputs: FxHashMap<String, InputRef>,
    is_active: Option<Arc<dyn ActivePredicate>>,
    output: Option<Arc<dyn FlowOutput>>,
    remove: Option<Arc<dyn RemoveOutput>>,
}

impl FlowBuilder {
    /// Override the output path; defaults to `[id]`.
    pub fn path<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Declare an input under a local name.
    pub fn input(mut self, name: impl Into<String>, input: InputRef) -> Self {
        self.inputs.insert(name.into(), input);
        self
    }

    /// Declare an input used only to decide activation.
    pub fn active_input(mut self, name: impl Into<String>, input: InputRef) -> Self {
        self.active_inputs.insert(name.into(), input);
        self
    }

    /// Activation predicate; defaults to always active.
    pub fn is_active(mut self, f: impl ActivePredicate + 'static) -> Self {
        self.is_active = Some(Arc::new(f));
        self
    }

    /// The output function (required).
    pub fn output(mut self, f: impl FlowOutput + 'static) -> Self {
        self.output = Some(Arc::new(f));
        self
    }

    /// Deactivation output; defaults to writing Null at the flow's path.
    pub fn remove(mut self, f: impl RemoveOutput + 'static) -> Self {
        self.remove = Some(Arc::new(f));
        self
    }

    /// Validate and build. Malformed declarations are rejected here, before
    /// they can reach the flow table.
    pub fn build(self) -> Result<FlowDefinition> {
        if self.id.is_empty() {
            return Err(RippleError::declaration("", "flows require an id"));
        }
        if self.inputs.is_empty() {
            return Err(RippleError::declaration(
                &self.id,
                "flows require at least one input",
            ));
        }
        let output = self.output.ok_or_else(|| {
            RippleError::declaration(&self.id, "flows require an output function")
        })?;

        let path = self
            .path
            .unwrap_or_else(|| std::iter::once(self.id.clone()).collect());
        let is_active = self
            .is_active
            .unwrap_or_else(|| Arc::new(|_: &ResolvedInputs| true) as Arc<dyn ActivePredicate>);
        let remove = self.remove.unwrap_or_else(|| {
            Arc::new(|state: &Value, path: &Path| {
                set_in(state, path, Value::Null).unwrap_or_else(|_| state.clone())
            }) as Arc<dyn RemoveOutput>
        });

        Ok(FlowDefinition {
            id: self.id,
            path,
            inputs: self.inputs,
            active_inputs: self.active_inputs,
            is_active,
            output,
            remove,
            lifecycle: Lifecycle::New,
        })
    }
}

/// The declared set of flows, in declaration order.
///
/// The table's `revision` is its identity: every mutation bumps it, and the
/// cached topological order is keyed on it. Equality compares revisions only,
/// which is what lets the whole table live inside an
/// [`AtomicCell`](crate::cell::AtomicCell).
#[derive(Clone, Default)]
pub struct FlowTable {
    revision: u64,
    order: Vec<String>,
    flows: FxHashMap<String, FlowDefinition>,
}

impl PartialEq for FlowTable {
    fn eq(&self, other: &Self) -> bool {
        self.revision == other.revision
    }
}

impl fmt::Debug for FlowTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTable")
            .field("revision", &self.revision)
            .field("order", &self.order)
            .finish()
    }
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table's identity; bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Insert or overwrite a declaration. A flow is `New` only if its id was
    /// not already declared; re-declaring an existing id keeps it past its
    /// first activation.
    pub fn insert(&mut self, mut def: FlowDefinition) {
        def.lifecycle = if self.flows.contains_key(&def.id) {
            Lifecycle::Live
        } else {
            self.order.push(def.id.clone());
            Lifecycle::New
        };
        self.flows.insert(def.id.clone(), def);
        self.revision += 1;
    }

    /// Logically retract a flow. The entry stays in the table; the executor
    /// applies its removal output on the next pass. Returns false for an
    /// unknown id.
    pub fn mark_removed(&mut self, id: &str) -> bool {
        match self.flows.get_mut(id) {
            Some(def) if def.lifecycle != Lifecycle::Retired => {
                def.lifecycle = Lifecycle::Removed;
                self.revision += 1;
                true
            }
            _ => false,
        }
    }

    /// Lifecycle bookkeeping from the executor (first activation, removal
    /// applied).
    pub(crate) fn settle(&mut self, id: &str, lifecycle: Lifecycle) {
        if let Some(def) = self.flows.get_mut(id) {
            if def.lifecycle != lifecycle {
                def.lifecycle = lifecycle;
                self.revision += 1;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&FlowDefinition> {
        self.flows.get(id)
    }

    /// The output path of a flow, if declared.
    pub fn flow_path(&self, id: &str) -> Option<&Path> {
        self.flows.get(id).map(|f| &f.path)
    }

    /// Flow ids in declaration order.
    pub fn ids_in_order(&self) -> &[String] {
        &self.order
    }
}
