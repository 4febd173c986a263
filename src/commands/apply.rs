//! `atoll apply` - converge recorded state to the declared stack.

use crate::cli::ApplyArgs;
use crate::config::Config;
use crate::local::LocalProvider;
use crate::{render, schema, stack, ui};
use anyhow::{Result, bail};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use reconciler::{CancelToken, Declaration, ExecuteOptions, FailureMode, FileStateStore};
use std::path::Path;
use std::time::Duration;

pub fn run(config: &Config, stack_path: &Path, args: &ApplyArgs, quiet: bool) -> Result<()> {
    let declarations = stack::load(stack_path)?;

    let mut options = config.execute_options();
    if let Some(jobs) = args.jobs {
        options.jobs = jobs;
    }
    if args.fail_fast {
        options.failure_mode = FailureMode::FailFast;
    } else if args.continue_on_error {
        options.failure_mode = FailureMode::BestEffort;
    }

    converge(config, declarations, &options, args.yes, args.dry_run, quiet)
}

/// Shared by apply and destroy; destroy is apply with nothing declared.
pub fn converge(
    config: &Config,
    declarations: Vec<Declaration>,
    options: &ExecuteOptions,
    yes: bool,
    dry_run: bool,
    quiet: bool,
) -> Result<()> {
    let store = FileStateStore::new(&config.state_dir);
    let schemas = schema::builtin();

    let preview = reconciler::plan(declarations.clone(), &store, &schemas)?;
    if !quiet {
        render::display_plan(&preview);
    }
    if !preview.has_changes() {
        return Ok(());
    }
    if dry_run {
        ui::warn("Dry run: nothing was changed");
        return Ok(());
    }
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Apply these {} change(s)?",
                preview.summary().total_changes()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            ui::warn("Aborted");
            return Ok(());
        }
    }

    let provider = LocalProvider::open(&config.world_file)?;
    let cancel = CancelToken::new();

    let spinner = progress_spinner(quiet);
    let report = reconciler::apply(declarations, &provider, &store, &schemas, options, &cancel);
    spinner.finish_and_clear();
    let report = report?;

    if !quiet {
        render::display_report(&report);
    }
    if report.canceled {
        bail!("run canceled before completion");
    }
    if !report.is_success() {
        bail!("{} resource(s) failed to converge", report.summary().failed);
    }
    if !quiet {
        ui::success("Stack converged");
    }
    Ok(())
}

fn progress_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message("Applying...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
