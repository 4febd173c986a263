//! `atoll plan` - preview without touching anything.

use crate::cli::{OutputFormat, PlanArgs};
use crate::config::Config;
use crate::{render, schema, stack, ui};
use anyhow::Result;
use reconciler::FileStateStore;
use std::path::Path;

pub fn run(config: &Config, stack_path: &Path, args: &PlanArgs) -> Result<()> {
    let declarations = stack::load(stack_path)?;
    let store = FileStateStore::new(&config.state_dir);
    let preview = reconciler::plan(declarations, &store, &schema::builtin())?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&preview)?),
        OutputFormat::Text => {
            ui::header(&format!("Plan: {}", stack_path.display()));
            render::display_plan(&preview);
        }
    }
    Ok(())
}
