//! Plan and report rendering.

use colored::Colorize;
use reconciler::{ApplyReport, LifecycleState, PlanPreview, ResourceAction, ResourceDiff, Value};

/// Display a plan preview in a user-friendly format
pub fn display_plan(preview: &PlanPreview) {
    if !preview.has_changes() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Plan".bold()
    );
    println!("│");

    for change in &preview.changes {
        if change.action == ResourceAction::NoOp {
            continue;
        }
        println!(
            "│   {} {:<30} {}",
            action_symbol(change.action),
            change.id.to_string(),
            change_detail(change).dimmed()
        );
    }
    for id in &preview.deletes {
        println!(
            "│   {} {:<30} {}",
            "-".red(),
            id.to_string(),
            "(no longer declared)".dimmed()
        );
    }

    let pending = preview
        .changes
        .iter()
        .filter(|c| c.action.is_change())
        .filter(|c| c.desired.values().any(Value::contains_unknown))
        .count();

    let summary = preview.summary();
    println!("│");
    if pending > 0 {
        println!(
            "│ {}",
            format!("{pending} resource(s) have values known only after apply").dimmed()
        );
    }
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} to create, {} to update, {} to replace, {} to delete",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.replaces.to_string().red(),
        summary.deletes.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

fn action_symbol(action: ResourceAction) -> colored::ColoredString {
    match action {
        ResourceAction::Create => "+".green(),
        ResourceAction::UpdateInPlace => "~".yellow(),
        ResourceAction::Replace => "±".red(),
        ResourceAction::Delete => "-".red(),
        ResourceAction::NoOp => " ".normal(),
    }
}

fn change_detail(change: &ResourceDiff) -> String {
    match change.action {
        ResourceAction::Create => "(new)".to_string(),
        ResourceAction::UpdateInPlace | ResourceAction::Replace => {
            let parts: Vec<String> = change
                .changed
                .iter()
                .map(|key| {
                    let from = change
                        .current
                        .as_ref()
                        .and_then(|attrs| attrs.get(key))
                        .map_or_else(|| "(absent)".to_string(), render_value);
                    let to = change
                        .desired
                        .get(key)
                        .map_or_else(|| "(removed)".to_string(), render_value);
                    format!("{key}: {from} → {to}")
                })
                .collect();
            parts.join(", ")
        }
        _ => String::new(),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Ref(binding) => binding.to_string(),
        Value::Unknown => "(known after apply)".to_string(),
        Value::List(_) | Value::Map(_) => "(nested)".to_string(),
    }
}

/// Display the per-node outcomes of an apply run
pub fn display_report(report: &ApplyReport) {
    println!();
    for outcome in &report.outcomes {
        match outcome.state {
            LifecycleState::Ready if outcome.action.is_change() => {
                println!(
                    "  {} {} {}",
                    "✓".green(),
                    outcome.id,
                    format!("({})", outcome.action).dimmed()
                );
            }
            LifecycleState::Ready => {}
            LifecycleState::Failed => {
                println!(
                    "  {} {} {}",
                    "✗".red(),
                    outcome.id,
                    outcome.error.as_deref().unwrap_or("failed").red()
                );
            }
            _ => {
                println!("  {} {} {}", "⚠".yellow(), outcome.id, outcome.state);
            }
        }
    }

    let summary = report.summary();
    println!();
    if report.canceled {
        println!("  {} Run canceled", "⚠".yellow());
    }
    println!(
        "  {} created, {} updated, {} replaced, {} deleted, {} unchanged, {} failed",
        summary.created.to_string().green(),
        summary.updated.to_string().yellow(),
        summary.replaced.to_string().yellow(),
        summary.deleted.to_string().red(),
        summary.no_change,
        if summary.failed > 0 {
            summary.failed.to_string().red().to_string()
        } else {
            summary.failed.to_string()
        }
    );
}
