// Package updates on controller units.
//
// A patch file lists application name patterns and the packages each should
// end up with. For every model, matching application and unit the apt
// command is run remotely; the apt output is parsed back into version
// changes and each unit is marked successful when every requested package
// landed at the requested version.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{CommandResult, FleetCommand, selected_models};
use crate::client::ControllerHandle;
use crate::config::ControllerConfig;
use crate::error::CoreError;

/// How long a single unit may spend in apt.
pub const UNIT_UPDATE_TIMEOUT: Duration = Duration::from_secs(600);

const APT_PREFIX: &str = "sudo apt-get update ; sudo apt-get \
    --option=Dpkg::Options::=--force-confold --option=Dpkg::Options::=--force-confdef";

/// Debian package name, optionally arch-qualified (`libssl3:amd64`).
/// Names end up in a shell command line, so nothing else is accepted.
fn is_package_name(name: &str) -> bool {
    let (base, arch) = match name.split_once(':') {
        Some((base, arch)) => (base, Some(arch)),
        None => (name, None),
    };
    let base_ok = base.len() >= 2
        && base.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && base
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '-'));
    let arch_ok = arch.is_none_or(|arch| {
        !arch.is_empty()
            && arch
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    });
    base_ok && arch_ok
}

// ── Patch file ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PatchFile {
    pub applications: Vec<ApplicationPatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApplicationPatch {
    /// Regex matched against the start of application names.
    #[serde(rename = "application")]
    pub name_expr: String,
    #[serde(default)]
    pub dist_upgrade: bool,
    #[serde(default)]
    pub packages_to_update: Vec<PackageToUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageToUpdate {
    #[serde(rename = "app")]
    pub package: String,
    /// `None` accepts any version.
    #[serde(default)]
    pub version: Option<String>,
}

impl ApplicationPatch {
    /// The apt command line for this application.
    pub fn command(&self, dry_run: bool) -> String {
        let mut command = String::from(APT_PREFIX);
        if self.dist_upgrade {
            command.push_str(" dist-upgrade --upgrade -y");
        } else {
            command.push_str(" install --upgrade -y");
            for package in &self.packages_to_update {
                command.push(' ');
                command.push_str(&package.package);
            }
        }
        if dry_run {
            command.push_str(" --dry-run");
        }
        command
    }

    /// Every requested package appears in `changes` at the requested
    /// version.
    pub fn satisfied_by(&self, changes: &[PackageChange]) -> bool {
        self.packages_to_update.iter().all(|wanted| {
            changes.iter().any(|change| {
                change.package == wanted.package
                    && wanted
                        .version
                        .as_ref()
                        .is_none_or(|version| *version == change.to_version)
            })
        })
    }
}

// ── Results ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageChange {
    pub package: String,
    /// `None` for a fresh install.
    pub from_version: Option<String>,
    pub to_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitUpdate {
    pub unit: String,
    pub command: String,
    pub packages: Vec<PackageChange>,
    pub raw_output: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationUpdate {
    pub application: String,
    pub matched_by: String,
    pub units: Vec<UnitUpdate>,
}

/// Parse apt output into package version changes.
///
/// Understands simulation lines
/// (`Inst libdrm2 [2.4.110-1ubuntu1] (2.4.113-2~ubuntu0.22.04.1 Ubuntu:22.04/jammy-updates [amd64])`)
/// and real-run lines
/// (`Unpacking software-properties-common (0.99.9.11) over (0.99.9.10) ...`).
pub fn parse_apt_output(output: &str) -> Vec<PackageChange> {
    output.lines().filter_map(parse_apt_line).collect()
}

fn parse_apt_line(line: &str) -> Option<PackageChange> {
    let (name, from_version, to_version) = if let Some(rest) = line.strip_prefix("Inst ") {
        let mut tokens = rest.split_whitespace();
        let name = tokens.next()?;
        let next = tokens.next()?;
        if next.starts_with('[') {
            (name, Some(next), tokens.next()?)
        } else {
            (name, None, next)
        }
    } else if let Some(rest) = line.strip_prefix("Unpacking ") {
        let mut tokens = rest.split_whitespace();
        let name = tokens.next()?;
        let to_version = tokens.next()?;
        let from_version = match tokens.next() {
            Some("over") => tokens.next(),
            _ => None,
        };
        (name, from_version, to_version)
    } else {
        return None;
    };

    let strip = |version: &str| {
        version
            .trim_matches(|c: char| matches!(c, '(' | ')' | '[' | ']'))
            .to_owned()
    };
    let to_version = strip(to_version);
    if to_version.is_empty() {
        return None;
    }

    // `libssl3:amd64` → `libssl3`
    let package = name.split(':').next().unwrap_or(name).to_owned();

    Some(PackageChange {
        package,
        from_version: from_version.map(strip).filter(|v| !v.is_empty()),
        to_version,
    })
}

// ── Command ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct UpdatePackages {
    patch: PatchFile,
    matchers: Vec<Regex>,
    /// Model names or aliases. Empty means all models.
    pub models: Vec<String>,
}

impl UpdatePackages {
    /// Validate the patch and compile its application patterns.
    pub fn new(patch: PatchFile, models: Vec<String>) -> Result<Self, CoreError> {
        let mut matchers = Vec::with_capacity(patch.applications.len());
        for (i, app) in patch.applications.iter().enumerate() {
            let field = format!("patch.applications[{i}]");
            let matcher = Regex::new(&format!("^(?:{})", app.name_expr))
                .map_err(|e| CoreError::config(format!("{field}.application"), e.to_string()))?;
            if !app.dist_upgrade && app.packages_to_update.is_empty() {
                return Err(CoreError::config(
                    format!("{field}.packages_to_update"),
                    "must list packages unless dist_upgrade is set",
                ));
            }
            if let Some(bad) = app
                .packages_to_update
                .iter()
                .find(|p| !is_package_name(&p.package))
            {
                return Err(CoreError::config(
                    format!("{field}.packages_to_update"),
                    format!("`{}` is not a valid package name", bad.package),
                ));
            }
            matchers.push(matcher);
        }

        Ok(Self {
            patch,
            matchers,
            models,
        })
    }

    pub fn patch(&self) -> &PatchFile {
        &self.patch
    }

    async fn make_updates(
        &self,
        controller: &ControllerHandle,
        config: &ControllerConfig,
        dry_run: bool,
    ) -> Result<Value, CoreError> {
        let api = controller.api().as_ref();
        let mut output = Map::new();

        for model in selected_models(api, config, &self.models).await? {
            let status = api.model_status(&model).await?;
            let mut updates = Vec::new();

            for (patch, matcher) in self.patch.applications.iter().zip(&self.matchers) {
                let command = patch.command(dry_run);
                for (application, app_status) in &status.applications {
                    if !matcher.is_match(application) {
                        continue;
                    }
                    info!(
                        controller = %config.name,
                        model = %model,
                        application = %application,
                        units = app_status.units.len(),
                        dry_run,
                        "updating application"
                    );

                    let mut units = Vec::with_capacity(app_status.units.len());
                    for unit in app_status.units.keys() {
                        let run = api
                            .run_on_unit(&model, unit, &command, UNIT_UPDATE_TIMEOUT)
                            .await?;
                        let packages = parse_apt_output(&run.stdout);
                        let success = run.succeeded() && patch.satisfied_by(&packages);
                        debug!(unit = %unit, changes = packages.len(), success, "unit updated");
                        units.push(UnitUpdate {
                            unit: unit.clone(),
                            command: command.clone(),
                            packages,
                            raw_output: run.stdout,
                            success,
                        });
                    }

                    updates.push(ApplicationUpdate {
                        application: application.clone(),
                        matched_by: patch.name_expr.clone(),
                        units,
                    });
                }
            }

            let updates =
                serde_json::to_value(updates).map_err(|e| CoreError::Internal(e.to_string()))?;
            output.insert(model, updates);
        }

        Ok(Value::Object(output))
    }
}

#[async_trait]
impl FleetCommand for UpdatePackages {
    fn name(&self) -> &'static str {
        "update-packages"
    }

    fn description(&self) -> &'static str {
        "Update packages on the units of matching applications"
    }

    fn is_write(&self) -> bool {
        true
    }

    /// Runs apt in simulation mode on every targeted unit.
    async fn dry_run(
        &self,
        controller: &ControllerHandle,
        config: &ControllerConfig,
    ) -> CommandResult {
        match self.make_updates(controller, config, true).await {
            Ok(output) => CommandResult::ok(output),
            Err(e) => CommandResult::failure(e.to_string()),
        }
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        self.make_updates(controller, config, false).await
    }
}
