//! Terminal tables and colored status output for the CLI.

use crate::backend::Backend;
use crate::models::ModelCatalogEntry;
use crate::pull_error::PullErrorKind;
use crate::recommend::ModelRecommendation;
use crate::setup::{SetupOutcome, SetupReport};
use crate::uninstall::{UninstallPlan, UninstallReport};
use colored::*;
use tabled::{Table, Tabled, settings::Style};

#[derive(Tabled)]
struct CatalogRow {
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "Identifier")]
    id: String,
    #[tabled(rename = "Roles")]
    roles: String,
    #[tabled(rename = "RAM")]
    ram: String,
    #[tabled(rename = "Context")]
    context: String,
    #[tabled(rename = "Tiers")]
    tiers: String,
}

#[derive(Tabled)]
struct PortfolioRow {
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "Identifier")]
    id: String,
    #[tabled(rename = "RAM")]
    ram: String,
    #[tabled(rename = "Context")]
    context: String,
}

fn context_text(tokens: u32) -> String {
    if tokens >= 1024 {
        format!("{}k", tokens / 1024)
    } else {
        tokens.to_string()
    }
}

pub fn display_catalog(entries: &[&ModelCatalogEntry], backend: Backend) {
    if entries.is_empty() {
        println!("\n{}", "No catalog entries match.".yellow());
        return;
    }

    println!("\n{}", format!("=== Model Catalog ({}) ===", backend).bold().cyan());
    println!("Total models: {}\n", entries.len());

    let rows: Vec<CatalogRow> = entries
        .iter()
        .map(|m| CatalogRow {
            name: m.name.to_string(),
            id: if backend.is_denied(m) {
                "(not published)".to_string()
            } else {
                backend.model_id(m)
            },
            roles: m
                .roles
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            ram: format!("{:.1} GB", m.ram_gb),
            context: context_text(m.context_length),
            tiers: m
                .tiers
                .iter()
                .map(|t| t.label())
                .collect::<Vec<_>>()
                .join(" "),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

pub fn display_recommendation(rec: &ModelRecommendation) {
    println!("\n{}", "=== Recommended Models ===".bold().cyan());
    println!(
        "Backend: {}   Tier: {}   Budget: {:.1} GB\n",
        rec.backend,
        rec.tier.label().bold(),
        rec.budget_gb
    );

    let slot = |label: &str, model: Option<&crate::recommend::RecommendedModel>| match model {
        Some(m) => PortfolioRow {
            role: label.to_string(),
            name: m.entry.name.to_string(),
            id: m.model_id.clone(),
            ram: format!("{:.1} GB", m.ram_gb()),
            context: context_text(m.context_length(rec.tier)),
        },
        None => PortfolioRow {
            role: label.to_string(),
            name: "-".to_string(),
            id: "-".to_string(),
            ram: "-".to_string(),
            context: "-".to_string(),
        },
    };

    let rows = vec![
        slot("Chat / Edit", rec.primary.as_ref()),
        slot("Autocomplete", rec.autocomplete.as_ref()),
        slot("Embeddings", rec.embeddings.as_ref()),
    ];
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);

    let total = format!("{:.1} / {:.1} GB", rec.total_ram(), rec.budget_gb);
    if rec.fits_budget() {
        println!("Total: {}", total.green());
    } else {
        println!("Total: {} {}", total.red(), "(over budget)".red());
    }
    if rec.conservative {
        println!(
            "{}",
            "Largest chat model did not fit; using the smallest eligible one.".yellow()
        );
    }
    println!();
}

pub fn display_status(backend: Backend, installed: bool, running: bool, models: &[String]) {
    let yes_no = |ok: bool| {
        if ok {
            "yes".green()
        } else {
            "no".red()
        }
    };

    println!("\n{}", format!("=== {} ===", backend).bold().cyan());
    println!("CLI ({}): {}", backend.cli(), yes_no(installed));
    println!("Server ({}): {}", backend.models_url(), yes_no(running));
    if !models.is_empty() {
        println!("\n{}", "Installed models:".bold().underline());
        for m in models {
            println!("  {}", m);
        }
    }
    println!();
}

fn print_troubleshooting(kind: PullErrorKind, backend: Backend) {
    for line in kind.troubleshooting(backend) {
        println!("    - {}", line);
    }
}

pub fn display_setup_report(report: &SetupReport) {
    let backend = report.recommendation.backend;
    let outcome = report.outcome();

    let heading = format!("=== Setup {} ===", outcome);
    let heading = match outcome {
        SetupOutcome::Complete => heading.bold().green(),
        SetupOutcome::Partial => heading.bold().yellow(),
        SetupOutcome::Failed => heading.bold().red(),
    };
    println!("\n{}", heading);

    if report.models_skipped {
        println!("Model downloads skipped (--skip-models)");
    }
    for m in &report.pulled {
        println!("  {} pulled {}", "✓".green(), m);
    }
    for m in &report.already_present {
        println!("  {} {} already installed", "✓".green(), m);
    }
    for f in &report.failed {
        println!(
            "  {} {} ({}): {}",
            "✗".red(),
            f.model,
            f.kind,
            f.message.lines().last().unwrap_or("")
        );
        print_troubleshooting(f.kind, backend);
    }

    if !report.failed.is_empty() {
        println!("\n{}", "What works now:".bold().underline());
        for (feature, ok) in report.usable_features() {
            let mark = if ok { "✓".green() } else { "✗".red() };
            println!("  {} {}", mark, feature);
        }
        println!("Re-run setup to retry the failed downloads.");
    }

    if !report.files.is_empty() {
        println!("\n{}", "Files written:".bold().underline());
        for path in &report.files {
            println!("  {}", path.display());
        }
    }
    println!();
}

pub fn display_uninstall_plan(plan: &UninstallPlan) {
    println!("\n{}", "=== Uninstall Plan ===".bold().cyan());
    if plan.is_empty() {
        println!("Nothing to remove.");
    }
    for m in &plan.models_to_remove {
        println!("  {} model {}", "remove".red(), m);
    }
    for k in &plan.models_kept {
        println!("  {} model {} ({})", "keep".green(), k.model, k.reason);
    }
    for p in &plan.files_to_restore {
        println!("  {} {} from backup", "restore".yellow(), p.display());
    }
    for p in &plan.files_to_remove {
        println!("  {} {}", "remove".red(), p.display());
    }
    println!();
}

pub fn display_uninstall_report(report: &UninstallReport) {
    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    println!(
        "{} {} model(s) and {} file(s); restored {} file(s).",
        verb,
        report.removed_models.len(),
        report.removed_files.len(),
        report.restored_files.len()
    );
    for (item, error) in &report.errors {
        println!("  {} {}: {}", "✗".red(), item, error);
    }
    if report.dry_run {
        println!("{}", "Dry run: nothing was changed.".yellow());
    }
}
