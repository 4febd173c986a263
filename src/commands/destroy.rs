//! `atoll destroy` - delete every recorded resource.
//!
//! Destroy is apply with nothing declared: every record becomes an
//! orphan and is pruned in reverse dependency order.

use crate::cli::DestroyArgs;
use crate::commands::apply;
use crate::config::Config;
use anyhow::Result;

pub fn run(config: &Config, args: &DestroyArgs, quiet: bool) -> Result<()> {
    let mut options = config.execute_options();
    if let Some(jobs) = args.jobs {
        options.jobs = jobs;
    }
    apply::converge(config, Vec::new(), &options, args.yes, false, quiet)
}
