//! Conditions selecting a policy backend.
//!
//! A condition compares either a request parameter or the caller's source
//! address against a value. A policy combines its conditions with its
//! effective mode: `ANY` is a logical OR, `ALL` a logical AND.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::apigw::api::params::RequestParam;
use crate::core::error::{ApigwError, ApigwResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionOrigin {
    #[serde(rename = "REQUEST")]
    Request,
    #[serde(rename = "source")]
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    Exact,
    Enum,
    Pattern,
}

impl ConditionType {
    fn wire(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Enum => "enum",
            Self::Pattern => "match",
        }
    }

    fn from_wire(raw: &str) -> ApigwResult<Self> {
        match raw {
            "exact" => Ok(Self::Exact),
            "enum" => Ok(Self::Enum),
            "match" | "pattern" => Ok(Self::Pattern),
            other => Err(ApigwError::UnexpectedState {
                operation: "read policy condition type".to_string(),
                state: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EffectiveMode {
    All,
    #[default]
    Any,
}

impl EffectiveMode {
    pub(crate) fn wire(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Any => "ANY",
        }
    }

    pub(crate) fn from_wire(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("ALL") {
            Self::All
        } else {
            Self::Any
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub origin: ConditionOrigin,
    /// Request parameter compared when `origin` is `REQUEST`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_name: Option<String>,
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct WireCondition {
    #[serde(default)]
    pub condition_origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_param_name: Option<String>,
    #[serde(default)]
    pub condition_type: String,
    #[serde(default)]
    pub condition_value: String,
}

impl Condition {
    pub(crate) fn to_wire(&self) -> WireCondition {
        WireCondition {
            condition_origin: match self.origin {
                ConditionOrigin::Request => "param".to_string(),
                ConditionOrigin::Source => "source".to_string(),
            },
            req_param_name: match self.origin {
                ConditionOrigin::Request => self.param_name.clone(),
                ConditionOrigin::Source => None,
            },
            condition_type: self.condition_type.wire().to_string(),
            condition_value: self.value.clone(),
        }
    }

    pub(crate) fn from_wire(wire: WireCondition) -> ApigwResult<Self> {
        let origin = if wire.condition_origin == "source" {
            ConditionOrigin::Source
        } else {
            ConditionOrigin::Request
        };
        Ok(Self {
            origin,
            param_name: match origin {
                ConditionOrigin::Request => wire.req_param_name.filter(|n| !n.is_empty()),
                ConditionOrigin::Source => None,
            },
            condition_type: ConditionType::from_wire(&wire.condition_type)?,
            value: wire.condition_value,
        })
    }

    pub(crate) fn validate(&self, field: &str, request_params: &BTreeSet<RequestParam>) -> ApigwResult<()> {
        if self.value.is_empty() {
            return Err(ApigwError::validation(field, "condition value must not be empty"));
        }
        if self.origin == ConditionOrigin::Request {
            let Some(name) = self.param_name.as_deref() else {
                return Err(ApigwError::validation(
                    field,
                    "param_name is required for REQUEST conditions",
                ));
            };
            if !request_params.iter().any(|param| param.name == name) {
                return Err(ApigwError::validation(
                    field,
                    format!("condition references unknown request parameter '{}'", name),
                ));
            }
        }
        if self.condition_type == ConditionType::Pattern {
            Regex::new(&self.value).map_err(|err| {
                ApigwError::validation(field, format!("invalid pattern '{}': {}", self.value, err))
            })?;
        }
        Ok(())
    }

    /// Evaluate against one request
    pub fn matches(&self, request: &ConditionContext) -> bool {
        let actual = match self.origin {
            ConditionOrigin::Request => self
                .param_name
                .as_deref()
                .and_then(|name| request.params.get(name))
                .map(String::as_str),
            ConditionOrigin::Source => request.source_ip.as_deref(),
        };
        let Some(actual) = actual else {
            return false;
        };
        match self.condition_type {
            ConditionType::Exact => actual == self.value,
            ConditionType::Enum => self.value.split(',').any(|candidate| candidate.trim() == actual),
            ConditionType::Pattern => Regex::new(&self.value)
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
        }
    }
}

/// Request attributes conditions are evaluated against
#[derive(Debug, Clone, Default)]
pub struct ConditionContext {
    pub params: HashMap<String, String>,
    pub source_ip: Option<String>,
}

impl ConditionContext {
    pub fn with_param<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_source_ip<S: Into<String>>(mut self, ip: S) -> Self {
        self.source_ip = Some(ip.into());
        self
    }
}

/// Combine conditions under a mode; an empty set never selects
pub fn evaluate(mode: EffectiveMode, conditions: &BTreeSet<Condition>, request: &ConditionContext) -> bool {
    if conditions.is_empty() {
        return false;
    }
    match mode {
        EffectiveMode::All => conditions.iter().all(|c| c.matches(request)),
        EffectiveMode::Any => conditions.iter().any(|c| c.matches(request)),
    }
}
