use crate::Context;
use crate::cli::OutputFormat;
use crate::{render, ui};
use anyhow::Result;
use colored::Colorize;
use compliance::{CategorySchema, Registry, UpdateMode};

/// List registered categories in remediation order
pub fn run(ctx: &Context, format: OutputFormat) -> Result<()> {
    let registry = Registry::builtin()?;

    if format == OutputFormat::Json {
        let categories: Vec<&CategorySchema> = registry.ordered().collect();
        return render::print_json(&categories);
    }

    ui::header(&format!("Categories ({})", registry.len()));
    for (index, category) in registry.ordered().enumerate() {
        ui::section(&format!("{}. {} v{}", index + 1, category.name, category.version));
        ui::kv("Remediation", &remediation(category));
        if !category.after.is_empty() {
            ui::kv("After", &category.after.join(", "));
        }
        if let Some(kind) = category.open_fields {
            ui::kv("Fields", &format!("any name ({})", kind.label()));
        }
        if ctx.verbose > 0 || category.open_fields.is_none() {
            for (name, spec) in &category.fields {
                let ordered = if spec.order_sensitive { ", ordered" } else { "" };
                ui::dim(&format!("{name}: {}{ordered}", spec.kind.label()));
            }
        }
    }
    println!();
    Ok(())
}

fn remediation(category: &CategorySchema) -> String {
    let Some(remediation) = &category.remediation else {
        return "none (read-only)".dimmed().to_string();
    };
    let mode = match remediation.mode {
        UpdateMode::Whole => "whole",
        UpdateMode::Delta => "delta",
        UpdateMode::PerEntry => "per entry",
        UpdateMode::PerField => "per field",
    };
    let mut line = format!("{} ({mode})", remediation.operation);
    if remediation.blocking {
        line.push_str(", blocking");
    }
    if !remediation.preconditions.is_empty() {
        let preconditions: Vec<String> = remediation
            .preconditions
            .iter()
            .map(ToString::to_string)
            .collect();
        line.push_str(&format!(", requires {}", preconditions.join(", ")));
    }
    line
}
