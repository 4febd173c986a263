//! `atoll status` - show recorded resources and their outputs.

use crate::cli::{OutputFormat, StatusArgs};
use crate::config::Config;
use crate::local::LocalProvider;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use reconciler::{FileStateStore, Provider, ResourceId, StateRecord, StateStore};
use serde::Serialize;

#[derive(Serialize)]
struct StatusEntry {
    id: ResourceId,
    #[serde(flatten)]
    record: StateRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    drift: Option<Drift>,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Drift {
    InSync,
    Missing,
    Diverged,
}

pub fn run(config: &Config, args: &StatusArgs) -> Result<()> {
    let store = FileStateStore::new(&config.state_dir);
    let provider = if args.drift {
        Some(LocalProvider::open(&config.world_file)?)
    } else {
        None
    };

    let mut entries = Vec::new();
    for id in store.list()? {
        let Some(record) = store.load(&id)? else {
            continue;
        };
        let drift = match &provider {
            None => None,
            Some(provider) => Some(check_drift(provider, &id, &record)?),
        };
        entries.push(StatusEntry { id, record, drift });
    }

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    ui::header("Stack status");
    if entries.is_empty() {
        ui::dim("No resources recorded");
        return Ok(());
    }
    for entry in &entries {
        let marker = match entry.drift {
            None | Some(Drift::InSync) => "●".green(),
            Some(Drift::Missing) => "○".red(),
            Some(Drift::Diverged) => "◐".yellow(),
        };
        println!(
            "  {} {:<30} {}",
            marker,
            entry.id.to_string(),
            entry.record.provider_id.dimmed()
        );
        ui::kv("updated", &entry.record.updated_at.to_rfc3339());
        if let Some(drift) = entry.drift
            && drift != Drift::InSync
        {
            ui::kv(
                "drift",
                match drift {
                    Drift::Missing => "missing from provider",
                    _ => "attributes diverged",
                },
            );
        }
    }
    Ok(())
}

fn check_drift(provider: &dyn Provider, id: &ResourceId, record: &StateRecord) -> Result<Drift> {
    let Some(live) = provider.read(&id.kind, &record.provider_id)? else {
        return Ok(Drift::Missing);
    };
    // Compare only the attributes we manage; providers may report more
    let diverged = record.attrs.iter().any(|(key, value)| {
        live.outputs.get(key).is_some_and(|actual| actual != value)
    });
    Ok(if diverged { Drift::Diverged } else { Drift::InSync })
}
