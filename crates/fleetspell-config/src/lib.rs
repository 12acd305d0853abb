//! Configuration for `fleetspell`.
//!
//! Controllers are described by two YAML files: a shared global file
//! (identity, endpoint, CA certificate, connection) and an optional personal
//! file (credentials and per-user overrides). Entries are merged by
//! controller `name`, personal fields winning, and translated into validated
//! [`fleetspell_core::ControllerConfig`]s in global-file order.

pub mod filter;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use fleetspell_core::config::{DEFAULT_PORT_RANGE, validate_port_range};
use fleetspell_core::{ConnectionConfig, ControllerConfig, CoreError, RetryPolicy};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use filter::ControllerFilter;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file {} not found", path.display())]
    NotFound { path: PathBuf },

    #[error("no controller matches filter `{expression}`")]
    NoMatch { expression: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl ConfigError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<CoreError> for ConfigError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Configuration { field, reason } => Self::Validation { field, reason },
            other => Self::validation("controller", other.to_string()),
        }
    }
}

// ── File locations ──────────────────────────────────────────────────

/// Overrides the global config file path.
pub const CONFIG_ENV: &str = "FLEETSPELL_CONFIG";
/// Overrides the personal config file path.
pub const PERSONAL_CONFIG_ENV: &str = "FLEETSPELL_PERSONAL_CONFIG";
/// Overrides the directory both files default into.
pub const DATA_ENV: &str = "FLEETSPELL_DATA";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub global: PathBuf,
    pub personal: PathBuf,
}

impl ConfigPaths {
    /// Resolve both paths from the process environment.
    pub fn from_env() -> Self {
        Self::resolve(|key| std::env::var_os(key))
    }

    /// Resolve both paths through `lookup`: an explicit file variable wins,
    /// then `FLEETSPELL_DATA`, then the platform data directory.
    pub fn resolve(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let data = lookup(DATA_ENV).map_or_else(default_data_dir, PathBuf::from);
        Self {
            global: lookup(CONFIG_ENV).map_or_else(|| data.join("config.yaml"), PathBuf::from),
            personal: lookup(PERSONAL_CONFIG_ENV)
                .map_or_else(|| data.join("config.personal.yaml"), PathBuf::from),
        }
    }
}

/// Platform data directory, e.g. `~/.local/share/fleetspell` on Linux.
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("io", "fleetspell", "fleetspell").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".local");
            p.push("share");
            p.push("fleetspell");
            p
        },
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

// ── YAML structs ────────────────────────────────────────────────────

/// Global config file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub controllers: Vec<ControllerEntry>,
}

/// Personal config file. Only `controllers` is read.
#[derive(Debug, Default, Deserialize)]
struct PersonalSettings {
    #[serde(default)]
    controllers: Vec<ControllerEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Local ports tried for SSH port-forwards.
    #[serde(default = "default_port_range")]
    pub port_range: PortRange,

    /// Applied to every controller that does not set its own.
    #[serde(default)]
    pub retry_policy: RetrySettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port_range: default_port_range(),
            retry_policy: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    fn to_range(self) -> Result<RangeInclusive<u16>, ConfigError> {
        let range = self.start..=self.end;
        validate_port_range(&range)
            .map_err(|reason| ConfigError::validation("connection.port_range", reason))?;
        Ok(range)
    }
}

fn default_port_range() -> PortRange {
    PortRange {
        start: *DEFAULT_PORT_RANGE.start(),
        end: *DEFAULT_PORT_RANGE.end(),
    }
}

/// Retry bounds as written in YAML: `wait` and `timeout` in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl RetrySettings {
    /// Field-wise fallback to `defaults`.
    fn or(self, defaults: Self) -> Self {
        Self {
            attempt: self.attempt.or(defaults.attempt),
            wait: self.wait.or(defaults.wait),
            timeout: self.timeout.or(defaults.timeout),
        }
    }

    fn to_policy(self, field: &str) -> Result<RetryPolicy, ConfigError> {
        if self.attempt == Some(0) {
            return Err(ConfigError::validation(
                format!("{field}.attempt"),
                "must be at least 1",
            ));
        }
        Ok(RetryPolicy {
            attempt: self.attempt,
            wait: seconds(self.wait, &format!("{field}.wait"))?,
            timeout: seconds(self.timeout, &format!("{field}.timeout"))?,
        })
    }
}

fn seconds(value: Option<f64>, field: &str) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| ConfigError::validation(field, format!("{secs}: {e}")))
        })
        .transpose()
}

/// One controller as written in either file. Every field is optional here
/// so the personal file can carry just a name and credentials.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerEntry {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub customer: Option<String>,
    pub owner: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub risk: Option<u8>,
    pub endpoint: Option<String>,
    pub ca_cert: Option<String>,
    #[serde(alias = "user")]
    pub username: Option<String>,
    pub password: Option<String>,
    pub model_mapping: Option<BTreeMap<String, ModelAlias>>,
    pub connection: Option<ConnectionEntry>,
    pub retry_policy: Option<RetrySettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionEntry {
    pub destination: String,
    #[serde(default)]
    pub jumps: Vec<String>,
    #[serde(default)]
    pub subnets: Option<Vec<String>>,
}

/// A model alias maps to one model or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ModelAlias {
    One(String),
    Many(Vec<String>),
}

impl From<ModelAlias> for Vec<String> {
    fn from(alias: ModelAlias) -> Self {
        match alias {
            ModelAlias::One(model) => vec![model],
            ModelAlias::Many(models) => models,
        }
    }
}

const DEFAULT_RISK: u8 = 5;

impl ControllerEntry {
    /// Overlay `personal` on top of this entry; every field it sets wins.
    pub fn overlay(self, personal: Self) -> Self {
        Self {
            uuid: personal.uuid.or(self.uuid),
            name: personal.name.or(self.name),
            customer: personal.customer.or(self.customer),
            owner: personal.owner.or(self.owner),
            description: personal.description.or(self.description),
            tags: personal.tags.or(self.tags),
            risk: personal.risk.or(self.risk),
            endpoint: personal.endpoint.or(self.endpoint),
            ca_cert: personal.ca_cert.or(self.ca_cert),
            username: personal.username.or(self.username),
            password: personal.password.or(self.password),
            model_mapping: personal.model_mapping.or(self.model_mapping),
            connection: personal.connection.or(self.connection),
            retry_policy: personal.retry_policy.or(self.retry_policy),
        }
    }

    fn into_controller(
        self,
        name: String,
        port_range: &RangeInclusive<u16>,
        default_retry: RetrySettings,
    ) -> Result<ControllerConfig, ConfigError> {
        let field = |f: &str| format!("{name}.{f}");
        let required = |value: Option<String>, f: &str| {
            value.ok_or_else(|| ConfigError::validation(field(f), "is required"))
        };

        let raw_uuid = required(self.uuid, "uuid")?;
        let uuid = Uuid::parse_str(&raw_uuid)
            .map_err(|e| ConfigError::validation(field("uuid"), format!("`{raw_uuid}`: {e}")))?;
        let customer = required(self.customer, "customer")?;
        let owner = required(self.owner, "owner")?;
        let endpoint = required(self.endpoint, "endpoint")?;
        let ca_cert = required(self.ca_cert, "ca_cert")?;
        let user = required(self.username, "username")?;
        let password = required(self.password, "password")?;
        let retry_policy = self
            .retry_policy
            .unwrap_or_default()
            .or(default_retry)
            .to_policy(&field("retry_policy"))?;

        let connection = self.connection.map(|c| ConnectionConfig {
            destination: c.destination,
            jumps: c.jumps,
            subnets: c.subnets,
            port_range: port_range.clone(),
        });
        let model_mapping = self
            .model_mapping
            .unwrap_or_default()
            .into_iter()
            .map(|(alias, models)| (alias, models.into()))
            .collect();

        let config = ControllerConfig {
            uuid,
            name,
            customer,
            owner,
            description: self.description,
            tags: self.tags.unwrap_or_default(),
            risk: self.risk.unwrap_or(DEFAULT_RISK),
            endpoint,
            ca_cert,
            user,
            password: SecretString::from(password),
            connection,
            retry_policy: Some(retry_policy),
            model_mapping,
        };
        config.validate()?;
        Ok(config)
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// Validated configuration, controllers in global-file order.
#[derive(Debug)]
pub struct Config {
    pub port_range: RangeInclusive<u16>,
    pub controllers: Vec<ControllerConfig>,
}

impl Config {
    /// Controllers matching `filter`. An empty filter keeps everything.
    pub fn filtered(&self, filter: &ControllerFilter) -> Result<Vec<ControllerConfig>, ConfigError> {
        filter.apply(&self.controllers)
    }
}

/// Load both files plus `FLEETSPELL_CONNECTION__*` environment overrides.
///
/// The global file must exist; the personal file is optional.
pub fn load(paths: &ConfigPaths) -> Result<Config, ConfigError> {
    if !paths.global.is_file() {
        return Err(ConfigError::NotFound {
            path: paths.global.clone(),
        });
    }

    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Yaml::file(&paths.global))
        .merge(
            Env::prefixed("FLEETSPELL_")
                .filter(|key| key.as_str().to_ascii_lowercase().starts_with("connection"))
                .split("__"),
        )
        .extract()?;
    info!(
        path = %paths.global.display(),
        controllers = settings.controllers.len(),
        "loaded global config"
    );

    let personal = if paths.personal.is_file() {
        let personal: PersonalSettings = Figment::from(Yaml::file(&paths.personal)).extract()?;
        info!(
            path = %paths.personal.display(),
            controllers = personal.controllers.len(),
            "loaded personal config"
        );
        personal.controllers
    } else {
        debug!(path = %paths.personal.display(), "no personal config");
        Vec::new()
    };

    build(settings, personal)
}

/// Merge parsed files and validate every controller.
pub fn build(settings: Settings, personal: Vec<ControllerEntry>) -> Result<Config, ConfigError> {
    let port_range = settings.connection.port_range.to_range()?;
    let default_retry = settings.connection.retry_policy;

    let mut overrides: HashMap<String, ControllerEntry> = HashMap::new();
    for (i, entry) in personal.into_iter().enumerate() {
        let Some(name) = entry.name.clone() else {
            return Err(ConfigError::validation(
                format!("personal.controllers[{i}].name"),
                "is required",
            ));
        };
        overrides.insert(name, entry);
    }

    let mut seen = HashSet::new();
    let mut controllers = Vec::with_capacity(settings.controllers.len());
    for (i, entry) in settings.controllers.into_iter().enumerate() {
        let Some(name) = entry.name.clone().filter(|n| !n.trim().is_empty()) else {
            return Err(ConfigError::validation(
                format!("controllers[{i}].name"),
                "is required",
            ));
        };
        if !seen.insert(name.clone()) {
            return Err(ConfigError::validation(
                format!("controllers[{i}].name"),
                format!("duplicate controller name `{name}`"),
            ));
        }

        let entry = match overrides.remove(&name) {
            Some(personal) => entry.overlay(personal),
            None => entry,
        };
        controllers.push(entry.into_controller(name, &port_range, default_retry)?);
    }

    for name in overrides.keys() {
        warn!(controller = %name, "personal config entry has no global controller, ignoring");
    }

    Ok(Config {
        port_range,
        controllers,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn paths_prefer_explicit_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (DATA_ENV, "/data"),
            (CONFIG_ENV, "/etc/fleetspell/global.yaml"),
        ]);
        let paths = ConfigPaths::resolve(|key| vars.get(key).map(OsString::from));

        assert_eq!(paths.global, PathBuf::from("/etc/fleetspell/global.yaml"));
        assert_eq!(paths.personal, PathBuf::from("/data/config.personal.yaml"));
    }

    #[test]
    fn paths_fall_back_to_data_dir() {
        let paths = ConfigPaths::resolve(|_| None);
        assert!(paths.global.ends_with("config.yaml"));
        assert!(paths.personal.ends_with("config.personal.yaml"));
        assert_eq!(paths.global.parent(), paths.personal.parent());
    }

    #[test]
    fn overlay_prefers_personal_fields() {
        let global = ControllerEntry {
            name: Some("prod".into()),
            endpoint: Some("10.0.0.1:17070".into()),
            username: Some("shared".into()),
            ..ControllerEntry::default()
        };
        let personal = ControllerEntry {
            name: Some("prod".into()),
            username: Some("alice".into()),
            password: Some("s3cret".into()),
            ..ControllerEntry::default()
        };

        let merged = global.overlay(personal);
        assert_eq!(merged.username.as_deref(), Some("alice"));
        assert_eq!(merged.password.as_deref(), Some("s3cret"));
        assert_eq!(merged.endpoint.as_deref(), Some("10.0.0.1:17070"));
    }

    #[test]
    fn retry_settings_fall_back_field_wise() {
        let own = RetrySettings {
            attempt: Some(3),
            ..RetrySettings::default()
        };
        let defaults = RetrySettings {
            attempt: Some(10),
            wait: Some(0.5),
            timeout: None,
        };

        let policy = own.or(defaults).to_policy("prod.retry_policy").unwrap();
        assert_eq!(policy.attempt, Some(3));
        assert_eq!(policy.wait, Some(Duration::from_millis(500)));
        assert_eq!(policy.timeout, None);
    }

    #[test]
    fn negative_seconds_are_rejected() {
        let err = RetrySettings {
            timeout: Some(-1.0),
            ..RetrySettings::default()
        }
        .to_policy("prod.retry_policy")
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "prod.retry_policy.timeout")
        );
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let err = RetrySettings {
            attempt: Some(0),
            ..RetrySettings::default()
        }
        .to_policy("r")
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn core_configuration_errors_keep_their_field() {
        let err: ConfigError = CoreError::Configuration {
            field: "prod.endpoint".into(),
            reason: "bad".into(),
        }
        .into();
        assert_eq!(err.to_string(), "invalid prod.endpoint: bad");
    }
}
