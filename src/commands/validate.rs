use crate::Context;
use crate::cli::{OutputFormat, ValidateArgs};
use crate::{render, ui};
use anyhow::{Context as _, Result, bail};
use compliance::{DesiredStateDocument, Registry, UnknownCategoryPolicy};
use serde_json::json;

/// Validate a document without contacting the management plane
pub fn run(ctx: &Context, args: &ValidateArgs) -> Result<()> {
    let doc = DesiredStateDocument::load(&args.desired)
        .with_context(|| format!("Failed to load desired state: {}", args.desired.display()))?;
    let registry = Registry::builtin()?;
    let policy = if args.reject_unknown {
        UnknownCategoryPolicy::Reject
    } else {
        ctx.config.unknown_categories
    };

    let problems = match doc.validate(&registry, policy) {
        Ok(desired) => {
            let ignored: Vec<&String> = doc
                .categories
                .keys()
                .filter(|name| !registry.contains(name))
                .collect();
            match args.format {
                OutputFormat::Json => render::print_json(&json!({
                    "valid": true,
                    "categories": desired.category_names(),
                    "ignored": ignored,
                }))?,
                OutputFormat::Text => {
                    for name in ignored {
                        ui::warn(&format!("Ignoring unknown category '{name}'"));
                    }
                    for (name, fields) in desired.categories() {
                        ui::kv(name, &format!("{} fields", fields.len()));
                    }
                    ui::success(&format!("{} is valid", args.desired.display()));
                }
            }
            return Ok(());
        }
        Err(compliance::Error::InvalidDesiredStateDocument { problems }) => problems,
        Err(e) => return Err(e.into()),
    };

    match args.format {
        OutputFormat::Json => render::print_json(&json!({"valid": false, "problems": problems}))?,
        OutputFormat::Text => {
            for problem in &problems {
                ui::error(problem);
            }
        }
    }
    bail!(
        "{} problems in {}",
        problems.len(),
        args.desired.display()
    )
}
