// ── Controller filter ──
//
// `key=v1,v2 key2=v3` narrows the controller list. Every key must match and
// any one of a key's values is enough. List fields (`tags`) match when they
// share at least one value with the filter.

use std::fmt;
use std::str::FromStr;

use fleetspell_core::ControllerConfig;

use crate::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    key: String,
    values: Vec<String>,
}

/// Parsed filter expression. The empty expression matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerFilter {
    expression: String,
    clauses: Vec<Clause>,
}

impl FromStr for ControllerFilter {
    type Err = ConfigError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let clauses = expression
            .split_whitespace()
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            expression: expression.trim().to_owned(),
            clauses,
        })
    }
}

fn parse_clause(token: &str) -> Result<Clause, ConfigError> {
    let malformed = |reason: &str| ConfigError::validation("filter", format!("`{token}`: {reason}"));

    let (key, values) = token
        .split_once('=')
        .ok_or_else(|| malformed("expected key=value[,value...]"))?;
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
        return Err(malformed("key must be a field name"));
    }
    let values: Vec<String> = values
        .split(',')
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .collect();
    if values.is_empty() || values.iter().any(|v| v.contains('=')) {
        return Err(malformed("expected comma separated values"));
    }

    Ok(Clause {
        key: key.to_ascii_lowercase(),
        values,
    })
}

impl ControllerFilter {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, controller: &ControllerConfig) -> bool {
        self.clauses.iter().all(|clause| {
            field_values(controller, &clause.key)
                .is_some_and(|have| have.iter().any(|v| clause.values.contains(v)))
        })
    }

    /// Controllers matching the filter, in order. A non-empty filter that
    /// matches nothing is an error.
    pub fn apply(&self, controllers: &[ControllerConfig]) -> Result<Vec<ControllerConfig>, ConfigError> {
        if self.is_empty() {
            return Ok(controllers.to_vec());
        }
        let matched: Vec<ControllerConfig> = controllers
            .iter()
            .filter(|c| self.matches(c))
            .cloned()
            .collect();
        if matched.is_empty() {
            return Err(ConfigError::NoMatch {
                expression: self.expression.clone(),
            });
        }
        Ok(matched)
    }
}

impl fmt::Display for ControllerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Values of `key` on `controller`. `None` for unknown or unset fields.
fn field_values(controller: &ControllerConfig, key: &str) -> Option<Vec<String>> {
    let one = |value: &str| Some(vec![value.to_owned()]);
    match key {
        "name" => one(&controller.name),
        "customer" => one(&controller.customer),
        "owner" => one(&controller.owner),
        "uuid" => Some(vec![controller.uuid.to_string()]),
        "endpoint" => one(&controller.endpoint),
        "description" => controller.description.as_deref().and_then(one),
        "risk" => Some(vec![controller.risk.to_string()]),
        "tags" if !controller.tags.is_empty() => Some(controller.tags.clone()),
        _ => None,
    }
}
