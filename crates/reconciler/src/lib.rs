//! # Reconciler
//!
//! A reconciliation core for declarative resource management: declare the
//! resources you want, and the engine diffs them against recorded state,
//! schedules the required operations over the dependency graph, and
//! converges the world to match.
//!
//! ## Core Concepts
//!
//! - **Declaration**: a desired resource - `(kind, name)` identity plus an
//!   attribute map that may hold deferred `${kind.name:output}` references
//! - **ResourceGraph**: validated DAG built from declarations (explicit
//!   `depends_on` edges plus implicit edges from output references)
//! - **StateStore**: last-known-good record per identity, persisted
//!   across runs
//! - **Provider**: the external seam that actually creates, updates, and
//!   deletes resources
//! - **plan / apply**: diff-only preview, and the converging run that
//!   walks the graph in parallel batches
//!
//! ## Example
//!
//! ```ignore
//! use reconciler::{
//!     Attrs, Declaration, ExecuteOptions, CancelToken, FileStateStore,
//!     OutputBinding, SchemaRegistry, TypeSchema, Value,
//! };
//!
//! let mut vpc = Attrs::new();
//! vpc.insert("region".into(), Value::from("ams3"));
//!
//! let mut cluster = Attrs::new();
//! cluster.insert("version".into(), Value::from("1.21.2-do.2"));
//! // The cluster's vpc_id is only known once the vpc exists
//! let binding = OutputBinding::parse("${vpc.main:id}").unwrap();
//! cluster.insert("vpc_id".into(), Value::Ref(binding));
//!
//! let declarations = vec![
//!     Declaration::new("vpc", "main", vpc),
//!     Declaration::new("cluster", "k8s", cluster),
//! ];
//!
//! let schemas = SchemaRegistry::new()
//!     .register("cluster", TypeSchema::new().mutable(["version"]));
//! let store = FileStateStore::new("/var/lib/atoll/state");
//!
//! let preview = reconciler::plan(declarations.clone(), &store, &schemas)?;
//! println!("{} change(s)", preview.summary().total_changes());
//!
//! let report = reconciler::apply(
//!     declarations,
//!     &provider, // impl reconciler::Provider
//!     &store,
//!     &schemas,
//!     &ExecuteOptions::default(),
//!     &CancelToken::new(),
//! )?;
//! assert!(report.is_success());
//! ```

pub mod diff;
pub mod error;
pub mod exec;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod provider;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use diff::{DiffSummary, ResourceDiff, SchemaRegistry, TypeSchema, changed_attrs, classify};
pub use error::{Error, Result};
pub use graph::{ExecutionPlan, ResourceGraph, ResourceNode};
pub use outputs::OutputResolver;
pub use plan::PlanPreview;
pub use provider::{Applied, Provider};
pub use retry::{LogCallback, RetryCallback, with_retry};
pub use state::{FileStateStore, MemoryStateStore, StateRecord, StateStore};
pub use types::{
    ApplyReport, Attrs, CancelToken, Declaration, ExecuteOptions, FailureMode, LifecycleState,
    NodeOutcome, OutputBinding, ReportSummary, ResourceAction, ResourceId, RetryConfig, Value,
};

/// Diff-only preview: what would `apply` change?
///
/// Pure with respect to the provider and the store; construction-time
/// errors (cycles, duplicate identities) surface here before anything
/// else runs.
pub fn plan(
    declarations: Vec<Declaration>,
    store: &dyn StateStore,
    schemas: &SchemaRegistry,
) -> Result<PlanPreview> {
    let graph = ResourceGraph::build(declarations)?;
    plan::plan_graph(&graph, store, schemas)
}

/// Converge the world to the declarations and report every node's
/// outcome. A failed node never prevents independent subgraphs from
/// completing unless [`FailureMode::FailFast`] is selected.
pub fn apply(
    declarations: Vec<Declaration>,
    provider: &dyn Provider,
    store: &dyn StateStore,
    schemas: &SchemaRegistry,
    options: &ExecuteOptions,
    cancel: &CancelToken,
) -> Result<ApplyReport> {
    let graph = ResourceGraph::build(declarations)?;
    exec::apply_graph(&graph, provider, store, schemas, options, cancel)
}
