//! Output resolver - propagates computed values across nodes.
//!
//! A producer's outputs become visible only when it reaches `Ready`;
//! consumers hold `Ref` values that are substituted just before their own
//! diff. Plan previews substitute `Unknown` where the value will only be
//! known after apply.

use crate::error::{Error, Result};
use crate::types::{Attrs, OutputBinding, ResourceId, Value};
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolved `(producer, output) -> value` map for one run.
#[derive(Debug, Default)]
pub struct OutputResolver {
    values: RwLock<HashMap<(ResourceId, String), Value>>,
}

impl OutputResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a producer's outputs. Each output is resolved exactly
    /// once; later publishes for the same key are ignored.
    pub fn publish(&self, producer: &ResourceId, outputs: &Attrs) {
        let mut values = self.values.write().expect("output lock poisoned");
        for (name, value) in outputs {
            values
                .entry((producer.clone(), name.clone()))
                .or_insert_with(|| value.clone());
        }
    }

    pub fn get(&self, binding: &OutputBinding) -> Option<Value> {
        self.values
            .read()
            .expect("output lock poisoned")
            .get(&(binding.producer.clone(), binding.output.clone()))
            .cloned()
    }

    /// Substitute every `Ref` in `attrs`. Fails with
    /// [`Error::UnresolvedOutput`] when a referenced output was never
    /// published.
    pub fn resolve_attrs(&self, attrs: &Attrs) -> Result<Attrs> {
        substitute(attrs, &|binding| self.get(binding), false)
    }
}

/// Substitute `Ref` values using `lookup`. With `missing_to_unknown`,
/// unresolvable bindings become [`Value::Unknown`] (plan preview);
/// otherwise they are an error.
pub fn substitute<F>(attrs: &Attrs, lookup: &F, missing_to_unknown: bool) -> Result<Attrs>
where
    F: Fn(&OutputBinding) -> Option<Value>,
{
    attrs
        .iter()
        .map(|(k, v)| Ok((k.clone(), substitute_value(v, lookup, missing_to_unknown)?)))
        .collect()
}

fn substitute_value<F>(value: &Value, lookup: &F, missing_to_unknown: bool) -> Result<Value>
where
    F: Fn(&OutputBinding) -> Option<Value>,
{
    match value {
        Value::Ref(binding) => match lookup(binding) {
            Some(resolved) => Ok(resolved),
            None if missing_to_unknown => Ok(Value::Unknown),
            None => Err(Error::UnresolvedOutput {
                binding: binding.clone(),
            }),
        },
        Value::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| substitute_value(item, lookup, missing_to_unknown))
                .collect::<Result<_>>()?,
        )),
        Value::Map(map) => Ok(Value::Map(substitute(map, lookup, missing_to_unknown)?)),
        other => Ok(other.clone()),
    }
}
