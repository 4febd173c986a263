//! Execution scheduler - walks the graph in dependency order and
//! converges every node.
//!
//! Each scheduling step selects the `Pending` nodes whose dependencies
//! are all `Ready` and runs them as one batch on a bounded worker pool.
//! Failures propagate to transitive dependents without executing them;
//! independent subgraphs keep going unless fail-fast is requested.
//! Replacement creates the new instance before deleting the old one, and
//! the old instance is only deleted once every dependent has converged
//! against the replacement, so no consumer ever points at a dead upstream.

use crate::diff::{SchemaRegistry, classify};
use crate::error::{Error, Result};
use crate::graph::{ResourceGraph, ResourceNode};
use crate::outputs::OutputResolver;
use crate::plan::deletion_order;
use crate::provider::{Applied, Provider};
use crate::retry::{LogCallback, with_retry};
use crate::state::{StateRecord, StateStore};
use crate::types::{
    ApplyReport, Attrs, CancelToken, ExecuteOptions, FailureMode, LifecycleState, NodeOutcome,
    ResourceAction, ResourceId, Value,
};
use chrono::Utc;
use rayon::prelude::*;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Apply a validated graph: diff every node against the state store and
/// drive the provider until all nodes are terminal.
pub fn apply_graph(
    graph: &ResourceGraph,
    provider: &dyn Provider,
    store: &dyn StateStore,
    schemas: &SchemaRegistry,
    options: &ExecuteOptions,
    cancel: &CancelToken,
) -> Result<ApplyReport> {
    Executor {
        graph,
        provider,
        store,
        schemas,
        options,
        cancel,
        resolver: OutputResolver::new(),
        replaced: Mutex::new(Vec::new()),
    }
    .run()
}

struct Executor<'a> {
    graph: &'a ResourceGraph,
    provider: &'a dyn Provider,
    store: &'a dyn StateStore,
    schemas: &'a SchemaRegistry,
    options: &'a ExecuteOptions,
    cancel: &'a CancelToken,
    resolver: OutputResolver,
    /// Old instances awaiting deletion once every dependent of the
    /// replaced node is terminal
    replaced: Mutex<Vec<ReplacedInstance>>,
}

struct ReplacedInstance {
    id: ResourceId,
    old_provider_id: String,
}

impl Executor<'_> {
    fn run(&self) -> Result<ApplyReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::permanent(format!("failed to build worker pool: {e}")))?;

        let mut states: BTreeMap<ResourceId, LifecycleState> = self
            .graph
            .ids()
            .map(|id| (id.clone(), LifecycleState::Pending))
            .collect();
        let mut outcomes: BTreeMap<ResourceId, NodeOutcome> = BTreeMap::new();
        let mut canceled = false;

        loop {
            self.propagate_failures(&mut states, &mut outcomes);

            if self.options.failure_mode == FailureMode::FailFast
                && states.values().any(|s| *s == LifecycleState::Failed)
            {
                self.abort_pending(&mut states, &mut outcomes);
                break;
            }

            if self.cancel.is_canceled() {
                canceled = true;
                self.report_undispatched(&states, &mut outcomes);
                break;
            }

            let batch: Vec<ResourceId> = states
                .iter()
                .filter(|(_, state)| **state == LifecycleState::Pending)
                .filter(|(id, _)| {
                    self.graph
                        .node(id)
                        .is_some_and(|n| {
                            n.deps.iter().all(|d| states.get(d) == Some(&LifecycleState::Ready))
                        })
                })
                .map(|(id, _)| id.clone())
                .collect();

            if batch.is_empty() {
                break;
            }
            log::debug!("dispatching batch of {} node(s)", batch.len());

            let results: Vec<NodeOutcome> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|id| self.run_node(id))
                    .collect()
            });
            for outcome in results {
                states.insert(outcome.id.clone(), outcome.state);
                outcomes.insert(outcome.id.clone(), outcome);
            }
            self.delete_replaced(&mut states, &mut outcomes);
        }

        self.delete_replaced(&mut states, &mut outcomes);
        for pending in self.replaced.lock().expect("replaced instance lock poisoned").iter() {
            log::warn!(
                "{}: replaced instance {} left in place, dependents never converged",
                pending.id,
                pending.old_provider_id
            );
        }

        let mut report_outcomes: Vec<NodeOutcome> = self
            .graph
            .ids()
            .filter_map(|id| outcomes.remove(id))
            .collect();

        if self.options.prune && !canceled {
            report_outcomes.extend(self.prune()?);
        }
        canceled = canceled || self.cancel.is_canceled();

        Ok(ApplyReport {
            outcomes: report_outcomes,
            canceled,
        })
    }

    /// Mark `Pending` nodes with a failed dependency as `Failed`,
    /// transitively, without executing them.
    fn propagate_failures(
        &self,
        states: &mut BTreeMap<ResourceId, LifecycleState>,
        outcomes: &mut BTreeMap<ResourceId, NodeOutcome>,
    ) {
        loop {
            let mut newly_failed: Vec<(ResourceId, ResourceId)> = Vec::new();
            for (id, state) in states.iter() {
                if *state != LifecycleState::Pending {
                    continue;
                }
                let failed_dep = self.graph.node(id).and_then(|n| {
                    n.deps
                        .iter()
                        .find(|d| states.get(*d) == Some(&LifecycleState::Failed))
                });
                if let Some(dep) = failed_dep {
                    newly_failed.push((id.clone(), dep.clone()));
                }
            }
            if newly_failed.is_empty() {
                return;
            }
            for (id, dep) in newly_failed {
                log::warn!("{id}: not executed, dependency {dep} failed");
                states.insert(id.clone(), LifecycleState::Failed);
                outcomes.insert(
                    id.clone(),
                    NodeOutcome {
                        id,
                        state: LifecycleState::Failed,
                        action: ResourceAction::NoOp,
                        error: Some(Error::DependencyFailed { dependency: dep }.to_string()),
                        attempts: 0,
                    },
                );
            }
        }
    }

    /// Fail-fast: stop dispatching and fail everything still pending.
    fn abort_pending(
        &self,
        states: &mut BTreeMap<ResourceId, LifecycleState>,
        outcomes: &mut BTreeMap<ResourceId, NodeOutcome>,
    ) {
        let pending: Vec<ResourceId> = states
            .iter()
            .filter(|(_, s)| **s == LifecycleState::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            states.insert(id.clone(), LifecycleState::Failed);
            outcomes.insert(
                id.clone(),
                NodeOutcome {
                    id,
                    state: LifecycleState::Failed,
                    action: ResourceAction::NoOp,
                    error: Some("not executed: run aborted after earlier failure".into()),
                    attempts: 0,
                },
            );
        }
    }

    /// Canceled before dispatch: report pending nodes as left pending.
    fn report_undispatched(
        &self,
        states: &BTreeMap<ResourceId, LifecycleState>,
        outcomes: &mut BTreeMap<ResourceId, NodeOutcome>,
    ) {
        for (id, state) in states {
            if *state == LifecycleState::Pending {
                outcomes.insert(
                    id.clone(),
                    NodeOutcome {
                        id: id.clone(),
                        state: LifecycleState::Pending,
                        action: ResourceAction::NoOp,
                        error: Some(Error::Canceled.to_string()),
                        attempts: 0,
                    },
                );
            }
        }
    }

    /// Delete old instances of replaced nodes whose dependents have all
    /// reached a terminal state, so no consumer still points at them.
    /// A failed delete flips the node's outcome to `Failed`; the new
    /// instance's record stays (it exists and must not be orphaned).
    fn delete_replaced(
        &self,
        states: &mut BTreeMap<ResourceId, LifecycleState>,
        outcomes: &mut BTreeMap<ResourceId, NodeOutcome>,
    ) {
        let mut replaced = self.replaced.lock().expect("replaced instance lock poisoned");
        let mut waiting = Vec::new();

        for pending in replaced.drain(..) {
            let repointed = self
                .graph
                .dependents(&pending.id)
                .iter()
                .all(|d| states.get(*d).is_some_and(|s| s.is_terminal()));
            if !repointed {
                waiting.push(pending);
                continue;
            }

            log::debug!(
                "{}: {} old instance {}",
                pending.id,
                LifecycleState::Deleting,
                pending.old_provider_id
            );
            let subject = pending.id.to_string();
            let callback = LogCallback { subject: &subject };
            let attempts = Cell::new(0u32);
            let result = with_retry(&self.options.retry, Some(&callback), || {
                attempts.set(attempts.get() + 1);
                self.provider.delete(&pending.id.kind, &pending.old_provider_id)
            });

            if let Err(e) = result {
                log::error!("{}: {e}", pending.id);
                states.insert(pending.id.clone(), LifecycleState::Failed);
                if let Some(outcome) = outcomes.get_mut(&pending.id) {
                    outcome.state = LifecycleState::Failed;
                    outcome.error = Some(e.to_string());
                }
            }
            if let Some(outcome) = outcomes.get_mut(&pending.id) {
                outcome.attempts += attempts.get();
            }
        }

        *replaced = waiting;
    }

    fn run_node(&self, id: &ResourceId) -> NodeOutcome {
        let node = self.graph.node(id).expect("scheduled id missing from graph");
        let attempts = Cell::new(0u32);
        let mut action = ResourceAction::NoOp;

        match self.converge(node, &mut action, &attempts) {
            Ok(()) => NodeOutcome {
                id: id.clone(),
                state: LifecycleState::Ready,
                action,
                error: None,
                attempts: attempts.get(),
            },
            Err(e) => {
                log::error!("{id}: {e}");
                NodeOutcome {
                    id: id.clone(),
                    state: LifecycleState::Failed,
                    action,
                    error: Some(e.to_string()),
                    attempts: attempts.get(),
                }
            }
        }
    }

    /// Per-node state machine:
    /// `Diffing -> {Creating|Updating|Deleting} -> Ready`, any step `-> Failed`.
    fn converge(
        &self,
        node: &ResourceNode,
        action_out: &mut ResourceAction,
        attempts: &Cell<u32>,
    ) -> Result<()> {
        let id = node.id();
        log::debug!("{id}: {}", LifecycleState::Diffing);
        let desired = self.resolver.resolve_attrs(&node.declaration.attrs)?;
        let record = self.store.load(id)?;

        let (action, changed) = classify(self.schemas.schema_for(&id.kind), &desired, record.as_ref());
        *action_out = action;

        let subject = id.to_string();
        let callback = LogCallback { subject: &subject };

        match action {
            ResourceAction::NoOp => {
                if let Some(record) = &record {
                    self.resolver.publish(id, &record.outputs);
                }
                log::debug!("{id}: unchanged");
                Ok(())
            }
            ResourceAction::Create => {
                log::info!("{id}: {}", LifecycleState::Creating);
                let applied = with_retry(&self.options.retry, Some(&callback), || {
                    attempts.set(attempts.get() + 1);
                    self.provider.create(&id.kind, &desired)
                })?;
                self.finish_apply(node, &desired, applied)
            }
            ResourceAction::UpdateInPlace => {
                let Some(record) = record else {
                    return Err(Error::permanent(format!("{id}: update without a state record")));
                };
                log::info!("{id}: {} ({} attribute(s))", LifecycleState::Updating, changed.len());
                let applied = with_retry(&self.options.retry, Some(&callback), || {
                    attempts.set(attempts.get() + 1);
                    self.provider.update(&id.kind, &record.provider_id, &desired)
                })?;
                self.finish_apply(node, &desired, applied)
            }
            ResourceAction::Replace => {
                let Some(record) = record else {
                    return Err(Error::permanent(format!("{id}: replace without a state record")));
                };
                // Create the replacement before deleting the original so
                // dependents always have a live upstream
                log::info!("{id}: replacing ({} attribute(s) immutable)", changed.len());
                let applied = with_retry(&self.options.retry, Some(&callback), || {
                    attempts.set(attempts.get() + 1);
                    self.provider.create(&id.kind, &desired)
                })?;
                self.finish_apply(node, &desired, applied)?;
                // The old instance lingers until every dependent has
                // re-pointed at the replacement; the scheduler deletes
                // it after their batch completes
                self.replaced
                    .lock()
                    .expect("replaced instance lock poisoned")
                    .push(ReplacedInstance {
                        id: id.clone(),
                        old_provider_id: record.provider_id,
                    });
                Ok(())
            }
            // Deletes are scheduled by prune, never by classify
            ResourceAction::Delete => Ok(()),
        }
    }

    /// Persist the new record and publish outputs for downstream nodes.
    fn finish_apply(&self, node: &ResourceNode, desired: &Attrs, applied: Applied) -> Result<()> {
        let id = node.id();
        let Applied {
            provider_id,
            mut outputs,
        } = applied;
        outputs
            .entry("id".to_string())
            .or_insert_with(|| Value::String(provider_id.clone()));

        let record = StateRecord {
            provider_id,
            attrs: desired.clone(),
            outputs: outputs.clone(),
            dependencies: node.deps.iter().cloned().collect(),
            updated_at: Utc::now(),
        };
        self.store.save(id, &record)?;
        self.resolver.publish(id, &outputs);
        log::debug!("{id}: {}", LifecycleState::Ready);
        Ok(())
    }

    /// Delete records with no matching declaration, dependents first.
    fn prune(&self) -> Result<Vec<NodeOutcome>> {
        let mut orphans: BTreeMap<ResourceId, StateRecord> = BTreeMap::new();
        for id in self.store.list()? {
            if !self.graph.contains(&id)
                && let Some(record) = self.store.load(&id)?
            {
                orphans.insert(id, record);
            }
        }

        let mut outcomes = Vec::new();
        for id in deletion_order(&orphans) {
            if self.cancel.is_canceled() {
                break;
            }
            let record = &orphans[&id];
            log::info!("{id}: {} (no longer declared)", LifecycleState::Deleting);

            let subject = id.to_string();
            let callback = LogCallback { subject: &subject };
            let attempts = Cell::new(0u32);
            let result = with_retry(&self.options.retry, Some(&callback), || {
                attempts.set(attempts.get() + 1);
                self.provider.delete(&id.kind, &record.provider_id)
            });

            match result {
                Ok(()) => {
                    self.store.delete(&id)?;
                    outcomes.push(NodeOutcome {
                        id,
                        state: LifecycleState::Ready,
                        action: ResourceAction::Delete,
                        error: None,
                        attempts: attempts.get(),
                    });
                }
                Err(e) => {
                    log::error!("{id}: {e}");
                    outcomes.push(NodeOutcome {
                        id,
                        state: LifecycleState::Failed,
                        action: ResourceAction::Delete,
                        error: Some(e.to_string()),
                        attempts: attempts.get(),
                    });
                }
            }
        }
        Ok(outcomes)
    }
}
