//! Flow dependency graph and topological evaluation order
//!
//! Edges run from dependency to dependent: a flow that reads another flow's
//! output is evaluated after it. The order is produced by Kahn's algorithm,
//! seeded in declaration order so ties resolve deterministically, and cached
//! keyed by the flow table's revision so evaluating an unchanged table costs
//! one revision compare.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::cell::AtomicCell;
use crate::error::{Result, RippleError};
use crate::flow::{FlowTable, InputRef};

/// In/out edges for one flow node.
#[derive(Clone, Debug, Default)]
struct NodeEdges {
    /// Flows this node depends on
    ins: SmallVec<[String; 4]>,
    /// Flows that depend on this node
    outs: SmallVec<[String; 4]>,
}

/// Dependency graph over the declared flow set.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    nodes: FxHashMap<String, NodeEdges>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of flows `id` depends on.
    pub fn in_degree(&self, id: &str) -> usize {
        self.nodes.get(id).map_or(0, |n| n.ins.len())
    }

    /// Flows that depend on `id`.
    pub fn dependents(&self, id: &str) -> &[String] {
        self.nodes.get(id).map_or(&[], |n| &n.outs)
    }

    /// Flows `id` depends on.
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.nodes.get(id).map_or(&[], |n| &n.ins)
    }
}

/// Build the dependency graph from the flow table: one node per declared
/// flow, one edge per flow-reference in its merged inputs. A reference to an
/// undeclared flow fails the whole batch.
pub fn build_graph(table: &FlowTable) -> Result<DependencyGraph> {
    let mut nodes: FxHashMap<String, NodeEdges> = FxHashMap::default();

    for id in table.ids_in_order() {
        nodes.entry(id.clone()).or_default();
        let Some(def) = table.get(id) else { continue };
        for input in def.merged_inputs().values() {
            if let InputRef::Flow(dep) = input {
                if table.get(dep).is_none() {
                    return Err(RippleError::DanglingFlow {
                        from: id.clone(),
                        to: dep.clone(),
                    });
                }
                nodes.entry(id.clone()).or_default().ins.push(dep.clone());
                nodes.entry(dep.clone()).or_default().outs.push(id.clone());
            }
        }
    }

    Ok(DependencyGraph { nodes })
}

/// Kahn's algorithm over the graph. The work queue is seeded with
/// zero-in-degree nodes in declaration order, so the produced order is
/// deterministic for a given table. An order shorter than the node count
/// means the declarations contain a cycle.
pub fn topological_order(
    graph: &DependencyGraph,
    declaration_order: &[String],
) -> Result<Vec<String>> {
    let mut in_degree: FxHashMap<&str, usize> = graph
        .nodes
        .iter()
        .map(|(id, edges)| (id.as_str(), edges.ins.len()))
        .collect();

    let mut queue: VecDeque<&str> = declaration_order
        .iter()
        .filter(|id| in_degree.get(id.as_str()) == Some(&0))
        .map(String::as_str)
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for dependent in graph.dependents(id) {
            if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if order.len() < graph.len() {
        let mut unresolved: Vec<String> = graph
            .nodes
            .keys()
            .filter(|id| !order.contains(id))
            .cloned()
            .collect();
        unresolved.sort();
        return Err(RippleError::GraphCycle(unresolved));
    }
    Ok(order)
}

/// Cached topological order, keyed by the flow table revision it was
/// computed from.
pub type TopoCache = Option<(u64, Arc<Vec<String>>)>;

/// The evaluation order for `table`, served from `cache` when the table's
/// revision matches. A cycle or dangling reference leaves the cache
/// untouched, so no partial order can be served later.
pub fn resolve_order(table: &FlowTable, cache: &AtomicCell<TopoCache>) -> Result<Arc<Vec<String>>> {
    if let Some((revision, order)) = cache.get() {
        if revision == table.revision() {
            return Ok(order);
        }
    }

    let graph = build_graph(table)?;
    let order = Arc::new(topological_order(&graph, table.ids_in_order())?);
    tracing::debug!(
        revision = table.revision(),
        flows = order.len(),
        "computed flow evaluation order"
    );
    cache.set(Some((table.revision(), order.clone())));
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowDefinition, ResolvedInputs};
    use crate::value::Value;

    fn flow(id: &str, deps: &[&str]) -> FlowDefinition {
        let mut b = FlowDefinition::builder(id).output(|_: &ResolvedInputs| Value::Int(0));
        if deps.is_empty() {
            b = b.input("x", InputRef::state(["count"]));
        }
        for (i, dep) in deps.iter().enumerate() {
            b = b.input(format!("in{i}"), InputRef::flow(*dep));
        }
        b.build().unwrap()
    }

    fn table(flows: Vec<FlowDefinition>) -> FlowTable {
        let mut t = FlowTable::new();
        for f in flows {
            t.insert(f);
        }
        t
    }

    #[test]
    fn test_edges_and_degrees() {
        let t = table(vec![flow("a", &[]), flow("b", &["a"]), flow("c", &["a", "b"])]);
        let g = build_graph(&t).unwrap();
        assert_eq!(g.len(), 3);
        assert_eq!(g.in_degree("a"), 0);
        assert_eq!(g.in_degree("b"), 1);
        assert_eq!(g.in_degree("c"), 2);
        assert_eq!(g.dependents("a").len(), 2);
    }

    #[test]
    fn test_topological_order_is_declaration_ordered() {
        // two independent roots: order follows declaration order
        let t = table(vec![flow("b", &[]), flow("a", &[]), flow("c", &["a"])]);
        let g = build_graph(&t).unwrap();
        let order = topological_order(&g, t.ids_in_order()).unwrap();
        assert_eq!(order, ["b", "a", "c"]);
    }

    #[test]
    fn test_diamond() {
        let t = table(vec![
            flow("root", &[]),
            flow("left", &["root"]),
            flow("right", &["root"]),
            flow("join", &["left", "right"]),
        ]);
        let g = build_graph(&t).unwrap();
        let order = topological_order(&g, t.ids_in_order()).unwrap();
        assert_eq!(order, ["root", "left", "right", "join"]);
    }

    #[test]
    fn test_cycle_is_an_error_and_never_cached() {
        let t = table(vec![flow("a", &["b"]), flow("b", &["a"]), flow("c", &[])]);
        let cache = AtomicCell::new(TopoCache::None);
        let err = resolve_order(&t, &cache).unwrap_err();
        match err {
            RippleError::GraphCycle(ids) => assert_eq!(ids, ["a", "b"]),
            other => panic!("expected GraphCycle, got {other:?}"),
        }
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_dangling_flow_reference() {
        let t = table(vec![flow("a", &["ghost"])]);
        let err = build_graph(&t).unwrap_err();
        assert_eq!(
            err,
            RippleError::DanglingFlow {
                from: "a".into(),
                to: "ghost".into()
            }
        );
    }

    #[test]
    fn test_order_cache_hit_and_invalidation() {
        let t = table(vec![flow("a", &[]), flow("b", &["a"])]);
        let cache = AtomicCell::new(TopoCache::None);

        let first = resolve_order(&t, &cache).unwrap();
        let second = resolve_order(&t, &cache).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // a table mutation changes identity and invalidates the cache
        let mut t2 = t.clone();
        t2.insert(flow("c", &["b"]));
        let third = resolve_order(&t2, &cache).unwrap();
        assert_eq!(*third, ["a", "b", "c"]);
        assert!(!Arc::ptr_eq(&first, &third));
    }
}
