//! Plan preview - diff-only walk of the graph, no mutation.
//!
//! Bindings resolve from the producer's state record when the producer
//! itself is a no-op; otherwise the value is only known after apply and
//! previews as `Unknown`, which conservatively reads as a change.

use crate::diff::{DiffSummary, ResourceDiff, SchemaRegistry, classify};
use crate::error::Result;
use crate::graph::{ExecutionPlan, ResourceGraph};
use crate::outputs::substitute;
use crate::state::{StateRecord, StateStore};
use crate::types::{ResourceAction, ResourceId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Diff-only preview of what an apply would do.
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    /// Per-node classification, in dependency order
    pub changes: Vec<ResourceDiff>,
    /// The batch schedule an apply would follow
    pub schedule: ExecutionPlan,
    /// Orphaned records (no matching declaration), in deletion order
    pub deletes: Vec<ResourceId>,
}

impl PlanPreview {
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for change in &self.changes {
            summary.add(change.action);
        }
        for _ in &self.deletes {
            summary.add(ResourceAction::Delete);
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.summary().has_changes()
    }

    pub fn action_for(&self, id: &ResourceId) -> Option<ResourceAction> {
        self.changes
            .iter()
            .find(|c| &c.id == id)
            .map(|c| c.action)
    }
}

/// Compute a plan preview for a validated graph.
pub fn plan_graph(
    graph: &ResourceGraph,
    store: &dyn StateStore,
    schemas: &SchemaRegistry,
) -> Result<PlanPreview> {
    let schedule = graph.execution_order();

    let mut records: BTreeMap<ResourceId, StateRecord> = BTreeMap::new();
    for id in graph.ids() {
        if let Some(record) = store.load(id)? {
            records.insert(id.clone(), record);
        }
    }

    let mut actions: BTreeMap<ResourceId, ResourceAction> = BTreeMap::new();
    let mut changes = Vec::with_capacity(graph.len());

    for id in schedule.iter() {
        let node = graph.node(id).expect("scheduled id missing from graph");
        let record = records.get(id);

        // A binding is known now only if its producer will not change
        let desired = substitute(
            &node.declaration.attrs,
            &|binding| {
                if actions.get(&binding.producer) != Some(&ResourceAction::NoOp) {
                    return None;
                }
                records
                    .get(&binding.producer)
                    .and_then(|r| r.outputs.get(&binding.output))
                    .cloned()
            },
            true,
        )?;

        let (action, changed) = classify(schemas.schema_for(&id.kind), &desired, record);
        actions.insert(id.clone(), action);
        changes.push(ResourceDiff {
            id: id.clone(),
            action,
            changed,
            current: record.map(|r| r.attrs.clone()),
            desired,
        });
    }

    let mut orphans: BTreeMap<ResourceId, StateRecord> = BTreeMap::new();
    for id in store.list()? {
        if !graph.contains(&id)
            && let Some(record) = store.load(&id)?
        {
            orphans.insert(id, record);
        }
    }

    Ok(PlanPreview {
        changes,
        schedule,
        deletes: deletion_order(&orphans),
    })
}

/// Order records for deletion: dependents before their dependencies,
/// using the dependency lists recorded at apply time.
pub fn deletion_order(records: &BTreeMap<ResourceId, StateRecord>) -> Vec<ResourceId> {
    let mut placed: Vec<ResourceId> = Vec::new();

    while placed.len() < records.len() {
        let batch: Vec<ResourceId> = records
            .iter()
            .filter(|(id, _)| !placed.contains(id))
            .filter(|(_, record)| {
                record
                    .dependencies
                    .iter()
                    .filter(|d| records.contains_key(*d))
                    .all(|d| placed.contains(d))
            })
            .map(|(id, _)| id.clone())
            .collect();
        if batch.is_empty() {
            // Recorded dependencies are inconsistent; fall back to a
            // stable order rather than spinning
            let mut rest: Vec<ResourceId> = records
                .keys()
                .filter(|id| !placed.contains(id))
                .cloned()
                .collect();
            placed.append(&mut rest);
            break;
        }
        placed.extend(batch);
    }

    placed.reverse();
    placed
}
