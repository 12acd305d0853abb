//! Output formatting: table, JSON, YAML.
//!
//! Fleet results render as one table row per controller, or as the
//! serialized result list for the structured formats.

use std::io::{self, IsTerminal, Write};
use std::path::Path;

use owo_colors::OwoColorize;
use serde_json::{Value, json};
use tabled::{Table, Tabled, settings::Style};

use fleetspell_core::{FleetEntry, FleetResult};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Controller")]
    controller: String,
    #[tabled(rename = "Customer")]
    customer: String,
    #[tabled(rename = "Result")]
    status: String,
    #[tabled(rename = "Output")]
    output: String,
}

impl ResultRow {
    fn from_entry(entry: &FleetEntry, color: bool) -> Result<Self, CliError> {
        let (status, output) = if entry.result.success {
            let output = match &entry.result.output {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(value) => serde_json::to_string_pretty(value)?,
            };
            (paint("ok", color, true), output)
        } else {
            let error = entry.result.error.clone().unwrap_or_default();
            (paint("failed", color, false), error)
        };

        Ok(Self {
            controller: entry.context.name.clone(),
            customer: entry.context.customer.clone(),
            status,
            output,
        })
    }
}

fn paint(text: &str, color: bool, good: bool) -> String {
    match (color, good) {
        (false, _) => text.to_owned(),
        (true, true) => text.green().to_string(),
        (true, false) => text.red().to_string(),
    }
}

/// Render a fleet result in the chosen format.
pub fn render_results(
    format: OutputFormat,
    results: &FleetResult,
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => {
            let rows = results
                .iter()
                .map(|entry| ResultRow::from_entry(entry, color))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(results)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(results)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(results)?),
    }
}

/// Render created users as a snippet ready to paste into the personal
/// config. Controllers where the user could not be created are left out.
pub fn render_personal_snippet(results: &FleetResult, personal: &Path) -> Result<String, CliError> {
    let controllers: Vec<Value> = results
        .iter()
        .filter(|entry| entry.result.success)
        .filter_map(|entry| {
            let output = entry.result.output.as_ref()?;
            Some(json!({
                "name": entry.context.name,
                "username": output.get("user")?,
                "password": output.get("password")?,
            }))
        })
        .collect();

    if controllers.is_empty() {
        return Ok(String::new());
    }
    let yaml = serde_yaml::to_string(&json!({ "controllers": controllers }))?;
    Ok(format!(
        "Add the new credentials to your personal config ({}):\n\n{yaml}",
        personal.display()
    ))
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
