// ── Runtime controller configuration ──
//
// These types describe one controller: who it is, where it lives and how to
// reach it. They carry credentials but never touch disk; `fleetspell-config`
// builds them from YAML and hands them in.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;

/// Local ports tried for SSH port-forwards unless configured otherwise.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 17071..=17169;

/// Wait between dial attempts when the policy does not set one.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_millis(1500);

/// Elapsed-time bound applied when neither `attempt` nor `timeout` is set.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// The identity triple attached to every fleet result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ControllerIdentity {
    pub uuid: Uuid,
    pub name: String,
    pub customer: String,
}

/// Bounded retry for establishing a controller connection.
///
/// Whichever bound is hit first stops the retry. With no bound at all,
/// [`DEFAULT_RETRY_TIMEOUT`] applies, so a dial can never loop forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempt: Option<u32>,
    pub wait: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn wait(&self) -> Duration {
        self.wait.unwrap_or(DEFAULT_RETRY_WAIT)
    }

    /// Maximum attempts, if bounded by count.
    pub fn max_attempts(&self) -> Option<u32> {
        self.attempt
    }

    /// Elapsed-time bound, falling back to the default when no bound is set.
    pub fn deadline(&self) -> Option<Duration> {
        match (self.attempt, self.timeout) {
            (_, Some(timeout)) => Some(timeout),
            (Some(_), None) => None,
            (None, None) => Some(DEFAULT_RETRY_TIMEOUT),
        }
    }
}

/// How to reach a controller that is not directly routable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// SSH target, e.g. `ubuntu@bastion.example.com`.
    pub destination: String,
    /// Jump hosts, in order.
    pub jumps: Vec<String>,
    /// IPv4 CIDRs routed through sshuttle for whole-subnet commands.
    pub subnets: Option<Vec<String>>,
    pub port_range: RangeInclusive<u16>,
}

impl ConnectionConfig {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            jumps: Vec::new(),
            subnets: None,
            port_range: DEFAULT_PORT_RANGE,
        }
    }

    /// Configured subnets, treating an empty list as absent.
    pub fn subnets(&self) -> Option<&[String]> {
        self.subnets.as_deref().filter(|s| !s.is_empty())
    }
}

/// Configuration for one controller, defaults already applied.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub uuid: Uuid,
    pub name: String,
    pub customer: String,
    pub owner: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// 1 (harmless) to 5 (critical).
    pub risk: u8,
    /// `host:port` of the controller API.
    pub endpoint: String,
    /// PEM text of the controller CA certificate.
    pub ca_cert: String,
    pub user: String,
    pub password: SecretString,
    /// Present only when the controller is not directly reachable.
    pub connection: Option<ConnectionConfig>,
    pub retry_policy: Option<RetryPolicy>,
    /// Model alias → concrete model names.
    pub model_mapping: BTreeMap<String, Vec<String>>,
}

impl ControllerConfig {
    pub fn identity(&self) -> ControllerIdentity {
        ControllerIdentity {
            uuid: self.uuid,
            name: self.name.clone(),
            customer: self.customer.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.unwrap_or_default()
    }

    /// Expand model aliases through `model_mapping`. Unmapped names pass
    /// through unchanged.
    pub fn expand_models(&self, models: &[String]) -> Vec<String> {
        models
            .iter()
            .flat_map(|model| {
                self.model_mapping
                    .get(model)
                    .cloned()
                    .unwrap_or_else(|| vec![model.clone()])
            })
            .collect()
    }

    /// Check the invariants the connection layer relies on.
    pub fn validate(&self) -> Result<(), CoreError> {
        let field = |name: &str| format!("{}.{name}", self.name);

        if self.name.trim().is_empty() {
            return Err(CoreError::config("name", "must not be empty"));
        }
        validate_endpoint(&self.endpoint)
            .map_err(|reason| CoreError::config(field("endpoint"), reason))?;
        validate_ca_cert(&self.ca_cert)
            .map_err(|reason| CoreError::config(field("ca_cert"), reason))?;
        if self.user.trim().is_empty() {
            return Err(CoreError::config(field("user"), "must not be empty"));
        }
        if !(1..=5).contains(&self.risk) {
            return Err(CoreError::config(
                field("risk"),
                format!("{} is outside 1-5", self.risk),
            ));
        }

        if let Some(connection) = &self.connection {
            validate_ssh_target(&connection.destination)
                .map_err(|reason| CoreError::config(field("connection.destination"), reason))?;
            for (i, jump) in connection.jumps.iter().enumerate() {
                validate_ssh_target(jump).map_err(|reason| {
                    CoreError::config(field(&format!("connection.jumps[{i}]")), reason)
                })?;
            }
            for subnet in connection.subnets.iter().flatten() {
                validate_subnet(subnet)
                    .map_err(|reason| CoreError::config(field("connection.subnets"), reason))?;
            }
            validate_port_range(&connection.port_range)
                .map_err(|reason| CoreError::config(field("connection.port_range"), reason))?;
        }

        Ok(())
    }
}

// ── Field validators ─────────────────────────────────────────────────

/// `host:port` with a non-zero port. IPv6 hosts must be bracketed.
pub fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| format!("`{endpoint}` is not host:port"))?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(format!("`{endpoint}` has an invalid host"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("`{endpoint}` has an invalid port")),
        Ok(_) => Ok(()),
    }
}

pub fn validate_ca_cert(pem: &str) -> Result<(), String> {
    let pem = pem.trim();
    if pem.starts_with("-----BEGIN CERTIFICATE-----") && pem.ends_with("-----END CERTIFICATE-----")
    {
        Ok(())
    } else {
        Err("not a PEM encoded certificate".into())
    }
}

pub fn validate_ssh_target(target: &str) -> Result<(), String> {
    if target.is_empty() {
        Err("must not be empty".into())
    } else if target.contains(char::is_whitespace) {
        Err(format!("`{target}` must not contain whitespace"))
    } else {
        Ok(())
    }
}

/// IPv4 CIDR with a prefix between 8 and 32.
pub fn validate_subnet(subnet: &str) -> Result<(), String> {
    let (addr, prefix) = subnet
        .split_once('/')
        .ok_or_else(|| format!("`{subnet}` is not in CIDR notation"))?;
    addr.parse::<Ipv4Addr>()
        .map_err(|e| format!("`{subnet}`: {e}"))?;
    match prefix.parse::<u8>() {
        Ok(8..=32) => Ok(()),
        _ => Err(format!("`{subnet}` prefix must be between 8 and 32")),
    }
}

pub fn validate_port_range(range: &RangeInclusive<u16>) -> Result<(), String> {
    if range.is_empty() || *range.start() == 0 {
        Err(format!(
            "{}..={} is not a usable port range",
            range.start(),
            range.end()
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub const TEST_CA: &str = "-----BEGIN CERTIFICATE-----\nMIIBfake\n-----END CERTIFICATE-----";

    /// A valid, directly reachable controller.
    pub fn controller(name: &str) -> ControllerConfig {
        ControllerConfig {
            uuid: Uuid::new_v4(),
            name: name.into(),
            customer: "acme".into(),
            owner: "ops".into(),
            description: None,
            tags: Vec::new(),
            risk: 3,
            endpoint: "10.1.0.10:17070".into(),
            ca_cert: TEST_CA.into(),
            user: "admin".into(),
            password: SecretString::from("secret"),
            connection: None,
            retry_policy: None,
            model_mapping: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::controller;
    use super::*;

    #[test]
    fn retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait(), Duration::from_millis(1500));
        assert_eq!(policy.deadline(), Some(DEFAULT_RETRY_TIMEOUT));
        assert_eq!(policy.max_attempts(), None);
    }

    #[test]
    fn attempt_only_policy_has_no_deadline() {
        let policy = RetryPolicy {
            attempt: Some(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.deadline(), None);

        let both = RetryPolicy {
            attempt: Some(3),
            timeout: Some(Duration::from_secs(5)),
            wait: None,
        };
        assert_eq!(both.deadline(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn expand_models_uses_mapping() {
        let mut config = controller("prod");
        config
            .model_mapping
            .insert("lma".into(), vec!["lma-1".into(), "lma-2".into()]);
        let expanded = config.expand_models(&["lma".into(), "openstack".into()]);
        assert_eq!(expanded, vec!["lma-1", "lma-2", "openstack"]);
    }

    #[test]
    fn valid_controller_passes() {
        let mut config = controller("prod");
        config.connection = Some(ConnectionConfig {
            destination: "ubuntu@bastion".into(),
            jumps: vec!["jump1".into()],
            subnets: Some(vec!["10.1.0.0/16".into()]),
            port_range: DEFAULT_PORT_RANGE,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let cases: Vec<(&str, Box<dyn Fn(&mut ControllerConfig)>)> = vec![
            ("prod.endpoint", Box::new(|c| c.endpoint = "10.1.0.10".into())),
            ("prod.endpoint", Box::new(|c| c.endpoint = "10.1.0.10:99999".into())),
            ("prod.ca_cert", Box::new(|c| c.ca_cert = "garbage".into())),
            ("prod.risk", Box::new(|c| c.risk = 6)),
            (
                "prod.connection.destination",
                Box::new(|c| c.connection = Some(ConnectionConfig::new("user@ host"))),
            ),
            (
                "prod.connection.subnets",
                Box::new(|c| {
                    let mut conn = ConnectionConfig::new("bastion");
                    conn.subnets = Some(vec!["10.0.0.0/4".into()]);
                    c.connection = Some(conn);
                }),
            ),
            (
                "prod.connection.port_range",
                Box::new(|c| {
                    let mut conn = ConnectionConfig::new("bastion");
                    conn.port_range = RangeInclusive::new(17100, 17000);
                    c.connection = Some(conn);
                }),
            ),
        ];

        for (expected_field, mutate) in cases {
            let mut config = controller("prod");
            mutate(&mut config);
            match config.validate() {
                Err(CoreError::Configuration { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected {expected_field} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn subnet_validation() {
        assert!(validate_subnet("192.168.0.0/24").is_ok());
        assert!(validate_subnet("10.0.0.1/32").is_ok());
        assert!(validate_subnet("10.0.0.0").is_err());
        assert!(validate_subnet("10.0.0.0/33").is_err());
        assert!(validate_subnet("fe80::/64").is_err());
    }
}
