//! Core types for declarative resource reconciliation

use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Attribute map of a resource. `BTreeMap` gives order-independent
/// equality and deterministic serialization.
pub type Attrs = BTreeMap<String, Value>;

// ============================================================================
// Identity
// ============================================================================

/// Stable identity of a declared resource: `(kind, name)`.
///
/// Rendered and parsed as `kind.name` (e.g. `vpc.midl-polkadot-vpc`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse a `kind.name` string. The name may itself contain dots.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, name) = s.split_once('.')?;
        if kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(kind, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid resource id: {s}")))
    }
}

// ============================================================================
// Output bindings
// ============================================================================

/// A deferred reference to a value only known after the producing
/// resource completes: `${kind.name:output}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputBinding {
    /// The resource whose output is referenced
    pub producer: ResourceId,
    /// Name of the output (e.g. `id`)
    pub output: String,
}

impl OutputBinding {
    pub fn new(producer: ResourceId, output: impl Into<String>) -> Self {
        Self {
            producer,
            output: output.into(),
        }
    }

    /// Parse a `${kind.name:output}` reference string.
    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.strip_prefix("${")?.strip_suffix('}')?;
        let (id, output) = inner.split_once(':')?;
        if output.is_empty() {
            return None;
        }
        Some(Self::new(ResourceId::parse(id)?, output))
    }
}

impl fmt::Display for OutputBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}:{}}}", self.producer, self.output)
    }
}

// ============================================================================
// Attribute values
// ============================================================================

/// An attribute value.
///
/// `Ref` is a deferred [`OutputBinding`]; it never survives into a state
/// record (the executor resolves every binding before persisting).
/// `Unknown` appears only in plan previews, standing in for a value that
/// will be known after apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Attrs),
    Ref(OutputBinding),
    Unknown,
}

impl Value {
    /// Whether this value (or any nested value) is a plan-time unknown.
    pub fn contains_unknown(&self) -> bool {
        match self {
            Self::Unknown => true,
            Self::List(items) => items.iter().any(Self::contains_unknown),
            Self::Map(map) => map.values().any(Self::contains_unknown),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
            // Round-trips: deserialization upgrades the ${...} form back to Ref
            Self::Ref(binding) => serializer.serialize_str(&binding.to_string()),
            Self::Unknown => serializer.serialize_str("<known after apply>"),
        }
    }
}

/// Untagged deserialization target; strings in `${...}` form are
/// upgraded to `Ref` afterwards.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<RawValue>),
    Map(BTreeMap<String, RawValue>),
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Bool(b) => Self::Bool(b),
            RawValue::Int(i) => Self::Int(i),
            RawValue::Float(f) => Self::Float(f),
            RawValue::String(s) => match OutputBinding::parse(&s) {
                Some(binding) => Self::Ref(binding),
                None => Self::String(s),
            },
            RawValue::List(items) => Self::List(items.into_iter().map(Into::into).collect()),
            RawValue::Map(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(RawValue::deserialize(deserializer)?.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// A single declared resource: identity, desired attributes, and
/// explicit dependencies. Implicit dependencies are harvested from
/// `Ref` values at graph construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub id: ResourceId,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,
}

impl Declaration {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, attrs: Attrs) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            attrs,
            depends_on: Vec::new(),
        }
    }

    /// Add an explicit dependency edge.
    #[must_use]
    pub fn depends_on(mut self, id: ResourceId) -> Self {
        self.depends_on.push(id);
        self
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Per-node lifecycle state, owned by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Diffing,
    Creating,
    Updating,
    Deleting,
    Ready,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Diffing => "diffing",
            Self::Creating => "creating",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The operation the diff engine selected for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceAction {
    NoOp,
    Create,
    UpdateInPlace,
    Replace,
    Delete,
}

impl ResourceAction {
    pub fn is_change(self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::UpdateInPlace => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Final result of a single node in an apply run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    pub id: ResourceId,
    pub state: LifecycleState,
    pub action: ResourceAction,
    /// Error detail when `state` is `Failed`
    pub error: Option<String>,
    /// Provider attempts made (0 for no-ops and skipped nodes)
    pub attempts: u32,
}

impl NodeOutcome {
    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }
}

/// Per-node outcome report for an apply run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub outcomes: Vec<NodeOutcome>,
    /// True when the run stopped dispatching because of cancellation
    pub canceled: bool,
}

impl ApplyReport {
    /// Whether every node completed and nothing was left behind.
    pub fn is_success(&self) -> bool {
        !self.canceled
            && self
                .outcomes
                .iter()
                .all(|o| o.state == LifecycleState::Ready)
    }

    pub fn outcome(&self, id: &ResourceId) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for outcome in &self.outcomes {
            summary.add(outcome);
        }
        summary
    }
}

/// Summary counts over an [`ApplyReport`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub no_change: usize,
    pub failed: usize,
}

impl ReportSummary {
    fn add(&mut self, outcome: &NodeOutcome) {
        if outcome.state == LifecycleState::Failed {
            self.failed += 1;
            return;
        }
        match outcome.action {
            ResourceAction::Create => self.created += 1,
            ResourceAction::UpdateInPlace => self.updated += 1,
            ResourceAction::Replace => self.replaced += 1,
            ResourceAction::Delete => self.deleted += 1,
            ResourceAction::NoOp => self.no_change += 1,
        }
    }

    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }
}

// ============================================================================
// Execution options
// ============================================================================

/// How execution responds to a node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Dependents of a failed node fail; independent subgraphs continue.
    #[default]
    BestEffort,
    /// Stop dispatching new batches after the first failure.
    FailFast,
}

/// Options for an apply run.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of parallel workers per batch
    pub jobs: usize,
    /// Failure propagation policy
    pub failure_mode: FailureMode,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
    /// Delete state records with no matching declaration
    pub prune: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            failure_mode: FailureMode::default(),
            retry: RetryConfig::default(),
            prune: true,
        }
    }
}

/// Retry configuration for transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation signal.
///
/// Cancellation stops dispatch of new batches; in-flight provider calls
/// run to completion so no external resource is orphaned mid-operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
