//! Resource graph builder - declarations to a validated DAG.
//!
//! Edges come from explicit `depends_on` references plus implicit edges
//! harvested from `Ref` attribute values. Construction fails on duplicate
//! identities, undeclared dependencies, and cycles; no partial graph is
//! ever returned. The graph is immutable for the lifetime of a run.

use crate::error::{Error, Result};
use crate::types::{Declaration, ResourceId, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A single node: its declaration and the merged dependency set.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub declaration: Declaration,
    /// Explicit `depends_on` plus producers of every `Ref` in the attrs
    pub deps: BTreeSet<ResourceId>,
}

impl ResourceNode {
    pub fn id(&self) -> &ResourceId {
        &self.declaration.id
    }
}

/// A validated, acyclic resource graph.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    nodes: BTreeMap<ResourceId, ResourceNode>,
}

impl ResourceGraph {
    /// Build a graph from declarations.
    ///
    /// Fails with [`Error::DuplicateIdentity`], [`Error::UnknownDependency`],
    /// or [`Error::Cycle`]; this is a pure transformation with no side
    /// effects.
    pub fn build(declarations: Vec<Declaration>) -> Result<Self> {
        let mut nodes: BTreeMap<ResourceId, ResourceNode> = BTreeMap::new();

        for declaration in declarations {
            let mut deps: BTreeSet<ResourceId> =
                declaration.depends_on.iter().cloned().collect();
            for value in declaration.attrs.values() {
                collect_ref_producers(value, &mut deps);
            }
            let id = declaration.id.clone();
            let node = ResourceNode { declaration, deps };
            if nodes.insert(id.clone(), node).is_some() {
                return Err(Error::DuplicateIdentity { id });
            }
        }

        for node in nodes.values() {
            for dep in &node.deps {
                if !nodes.contains_key(dep) {
                    return Err(Error::UnknownDependency {
                        from: node.id().clone(),
                        to: dep.clone(),
                    });
                }
            }
        }

        let graph = Self { nodes };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// DFS with recursion-stack marking; reports the offending path.
    fn check_acyclic(&self) -> Result<()> {
        let mut visited: BTreeSet<&ResourceId> = BTreeSet::new();
        let mut stack: Vec<&ResourceId> = Vec::new();

        for id in self.nodes.keys() {
            self.visit(id, &mut visited, &mut stack)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        id: &'a ResourceId,
        visited: &mut BTreeSet<&'a ResourceId>,
        stack: &mut Vec<&'a ResourceId>,
    ) -> Result<()> {
        if let Some(pos) = stack.iter().position(|s| *s == id) {
            let mut path: Vec<String> = stack[pos..].iter().map(ToString::to_string).collect();
            path.push(id.to_string());
            return Err(Error::Cycle {
                path: path.join(" -> "),
            });
        }
        if visited.contains(id) {
            return Ok(());
        }

        stack.push(id);
        for dep in &self.nodes[id].deps {
            self.visit(dep, visited, stack)?;
        }
        stack.pop();
        visited.insert(id);
        Ok(())
    }

    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.nodes.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependents of a node (nodes with an edge to `id`).
    pub fn dependents(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.nodes
            .values()
            .filter(|n| n.deps.contains(id))
            .map(ResourceNode::id)
            .collect()
    }

    /// Topological batch schedule: each batch contains nodes whose every
    /// dependency sits in an earlier batch, so a batch is safe to run
    /// concurrently. Deterministic for a given graph.
    pub fn execution_order(&self) -> ExecutionPlan {
        let mut placed: BTreeSet<ResourceId> = BTreeSet::new();
        let mut batches = Vec::new();

        while placed.len() < self.nodes.len() {
            // Guaranteed non-empty: the graph is acyclic
            let batch: Vec<ResourceId> = self
                .nodes
                .values()
                .filter(|n| !placed.contains(n.id()))
                .filter(|n| n.deps.iter().all(|d| placed.contains(d)))
                .map(|n| n.id().clone())
                .collect();
            placed.extend(batch.iter().cloned());
            batches.push(batch);
        }

        ExecutionPlan { batches }
    }
}

/// Ordered batches of node identities. Rebuilt whenever the graph
/// changes; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub batches: Vec<Vec<ResourceId>>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of scheduled nodes.
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Flat iteration in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceId> {
        self.batches.iter().flatten()
    }
}

/// Walk a value tree and collect the producers of every `Ref`.
fn collect_ref_producers(value: &Value, out: &mut BTreeSet<ResourceId>) {
    match value {
        Value::Ref(binding) => {
            out.insert(binding.producer.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_ref_producers(item, out);
            }
        }
        Value::Map(map) => {
            for item in map.values() {
                collect_ref_producers(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attrs, OutputBinding};

    fn decl(kind: &str, name: &str) -> Declaration {
        Declaration::new(kind, name, Attrs::new())
    }

    fn id(kind: &str, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    #[test]
    fn test_build_simple_chain() {
        let graph = ResourceGraph::build(vec![
            decl("vpc", "n"),
            decl("cluster", "c").depends_on(id("vpc", "n")),
        ])
        .unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.node(&id("cluster", "c")).unwrap().deps.contains(&id("vpc", "n")));
    }

    #[test]
    fn test_implicit_edge_from_ref() {
        let mut attrs = Attrs::new();
        attrs.insert(
            "vpc_id".into(),
            Value::Ref(OutputBinding::new(id("vpc", "n"), "id")),
        );
        let graph = ResourceGraph::build(vec![
            decl("vpc", "n"),
            Declaration::new("cluster", "c", attrs),
        ])
        .unwrap();
        assert!(graph.node(&id("cluster", "c")).unwrap().deps.contains(&id("vpc", "n")));
    }

    #[test]
    fn test_nested_ref_harvested() {
        let mut inner = Attrs::new();
        inner.insert(
            "registry".into(),
            Value::List(vec![Value::Ref(OutputBinding::new(id("registry", "r"), "endpoint"))]),
        );
        let mut attrs = Attrs::new();
        attrs.insert("values".into(), Value::Map(inner));
        let graph = ResourceGraph::build(vec![
            decl("registry", "r"),
            Declaration::new("helm_release", "ingest", attrs),
        ])
        .unwrap();
        assert!(
            graph
                .node(&id("helm_release", "ingest"))
                .unwrap()
                .deps
                .contains(&id("registry", "r"))
        );
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let err = ResourceGraph::build(vec![decl("vpc", "n"), decl("vpc", "n")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentity { .. }));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err =
            ResourceGraph::build(vec![decl("cluster", "c").depends_on(id("vpc", "missing"))])
                .unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
    }

    #[test]
    fn test_two_node_cycle_rejected() {
        let err = ResourceGraph::build(vec![
            decl("a", "x").depends_on(id("b", "y")),
            decl("b", "y").depends_on(id("a", "x")),
        ])
        .unwrap_err();
        match err {
            Error::Cycle { path } => {
                assert!(path.contains("a.x"));
                assert!(path.contains("b.y"));
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err =
            ResourceGraph::build(vec![decl("a", "x").depends_on(id("a", "x"))]).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
    }

    #[test]
    fn test_execution_order_is_topological() {
        let graph = ResourceGraph::build(vec![
            decl("vpc", "n"),
            decl("cluster", "c").depends_on(id("vpc", "n")),
            decl("registry", "r"),
            decl("helm_release", "h").depends_on(id("cluster", "c")),
        ])
        .unwrap();

        let plan = graph.execution_order();
        assert_eq!(plan.len(), 4);

        // Every edge source must appear after its target
        let order: Vec<&ResourceId> = plan.iter().collect();
        for node in graph.nodes() {
            let own = order.iter().position(|o| *o == node.id()).unwrap();
            for dep in &node.deps {
                let dep_pos = order.iter().position(|o| *o == dep).unwrap();
                assert!(dep_pos < own, "{dep} must be ordered before {}", node.id());
            }
        }

        // Independent roots share the first batch
        assert!(plan.batches[0].contains(&id("vpc", "n")));
        assert!(plan.batches[0].contains(&id("registry", "r")));
        assert_eq!(plan.batches[1], vec![id("cluster", "c")]);
        assert_eq!(plan.batches[2], vec![id("helm_release", "h")]);
    }

    #[test]
    fn test_dependents() {
        let graph = ResourceGraph::build(vec![
            decl("vpc", "n"),
            decl("cluster", "c").depends_on(id("vpc", "n")),
            decl("node_pool", "p").depends_on(id("cluster", "c")),
        ])
        .unwrap();
        assert_eq!(graph.dependents(&id("vpc", "n")), vec![&id("cluster", "c")]);
        assert!(graph.dependents(&id("node_pool", "p")).is_empty());
    }
}
