//! Stack file loading.
//!
//! A stack is a TOML file with an array of `[[resource]]` tables. String
//! attributes in `${kind.name:output}` form become deferred output
//! bindings when deserialized.

use anyhow::{Context, Result};
use reconciler::{Attrs, Declaration, ResourceId};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct StackFile {
    #[serde(default)]
    resource: Vec<ResourceEntry>,
}

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    kind: String,
    name: String,
    #[serde(default)]
    attrs: Attrs,
    #[serde(default)]
    depends_on: Vec<ResourceId>,
}

/// Load declarations from a stack file.
pub fn load(path: &Path) -> Result<Vec<Declaration>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read stack file {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid stack file {}", path.display()))
}

fn parse(content: &str) -> Result<Vec<Declaration>> {
    let file: StackFile = toml::from_str(content)?;
    Ok(file
        .resource
        .into_iter()
        .map(|entry| {
            let mut declaration = Declaration::new(entry.kind, entry.name, entry.attrs);
            for dep in entry.depends_on {
                declaration = declaration.depends_on(dep);
            }
            declaration
        })
        .collect())
}
