//! Diff engine - classify desired attributes against stored state.
//!
//! Which attribute changes can be applied in place is a per-kind
//! capability, looked up in a [`SchemaRegistry`] keyed by kind rather
//! than modeled per type. Anything not explicitly marked mutable is
//! treated as replacement-triggering.

use crate::state::StateRecord;
use crate::types::{Attrs, ResourceAction, ResourceId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Change capabilities of one resource kind.
#[derive(Debug, Clone, Default)]
pub struct TypeSchema {
    mutable: BTreeSet<String>,
}

impl TypeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark attributes as updatable in place.
    #[must_use]
    pub fn mutable<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutable.extend(attrs.into_iter().map(Into::into));
        self
    }

    /// Whether a change to `attr` can be applied without replacement.
    pub fn is_mutable(&self, attr: &str) -> bool {
        self.mutable.contains(attr)
    }
}

/// Capability lookup table keyed by resource kind.
///
/// Kinds without a registered schema get the conservative default:
/// every change triggers replacement.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    kinds: BTreeMap<String, TypeSchema>,
    default: TypeSchema,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(mut self, kind: impl Into<String>, schema: TypeSchema) -> Self {
        self.kinds.insert(kind.into(), schema);
        self
    }

    pub fn schema_for(&self, kind: &str) -> &TypeSchema {
        self.kinds.get(kind).unwrap_or(&self.default)
    }
}

/// Attribute keys whose values differ between desired and recorded state.
///
/// Equality is order-independent for maps and exact for lists; a plan-time
/// `Unknown` never equals a recorded value, so it always reads as changed.
pub fn changed_attrs(desired: &Attrs, recorded: &Attrs) -> Vec<String> {
    let keys: BTreeSet<&String> = desired.keys().chain(recorded.keys()).collect();
    keys.into_iter()
        .filter(|k| desired.get(*k) != recorded.get(*k))
        .cloned()
        .collect()
}

/// Classify one node's operation.
///
/// No record means `Create`; identical attributes mean `NoOp`; otherwise
/// `UpdateInPlace` only when every changed attribute is mutable for the
/// kind. Replace wins whenever any replacement-triggering attribute
/// changed, even if mutable attributes changed alongside it.
pub fn classify(
    schema: &TypeSchema,
    desired: &Attrs,
    record: Option<&StateRecord>,
) -> (ResourceAction, Vec<String>) {
    let Some(record) = record else {
        return (ResourceAction::Create, desired.keys().cloned().collect());
    };

    let changed = changed_attrs(desired, &record.attrs);
    if changed.is_empty() {
        return (ResourceAction::NoOp, changed);
    }

    if changed.iter().all(|attr| schema.is_mutable(attr)) {
        (ResourceAction::UpdateInPlace, changed)
    } else {
        (ResourceAction::Replace, changed)
    }
}

// ============================================================================
// Rendering support
// ============================================================================

/// One node's planned change, for preview and rendering.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDiff {
    pub id: ResourceId,
    pub action: ResourceAction,
    /// Attribute keys that differ
    pub changed: Vec<String>,
    /// Recorded attributes, if a record exists
    pub current: Option<Attrs>,
    /// Desired attributes (bindings resolved where known)
    pub desired: Attrs,
}

/// Summary statistics over a set of planned changes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub no_ops: usize,
}

impl DiffSummary {
    pub fn add(&mut self, action: ResourceAction) {
        match action {
            ResourceAction::Create => self.creates += 1,
            ResourceAction::UpdateInPlace => self.updates += 1,
            ResourceAction::Replace => self.replaces += 1,
            ResourceAction::Delete => self.deletes += 1,
            ResourceAction::NoOp => self.no_ops += 1,
        }
    }

    pub fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}
