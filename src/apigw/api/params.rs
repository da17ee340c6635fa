//! Request and backend parameters of an API.
//!
//! Both kinds are unordered sets. Backend parameters order by
//! `(type, name)` first so diffs stay stable when the service reorders them.
//! `SYSTEM` backend parameters carry a `system_param_type`; on the wire their
//! value becomes a `$context` expression which is reversed on read.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::apigw::non_empty;
use crate::apigw::validation::{check_max_len, check_pattern, PARAM_NAME};
use crate::core::error::{ApigwError, ApigwResult};

/// System variables the gateway resolves under `$context.<name>`
pub const INTERNAL_SYSTEM_PARAMS: &[&str] = &[
    "sourceIp",
    "stage",
    "apiId",
    "appId",
    "requestId",
    "serverAddr",
    "serverName",
    "handleTime",
    "providerAppId",
];

static AUTHORIZER_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$context\.authorizer\.(frontend|backend)\.(.+)$").expect("static regex")
});

static INTERNAL_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$context\.([A-Za-z]+)$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
}

impl ParamLocation {
    pub(crate) fn wire(self) -> &'static str {
        match self {
            Self::Path => "PATH",
            Self::Query => "QUERY",
            Self::Header => "HEADER",
        }
    }

    pub(crate) fn from_wire(raw: &str) -> ApigwResult<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "PATH" => Ok(Self::Path),
            "QUERY" => Ok(Self::Query),
            "HEADER" => Ok(Self::Header),
            other => Err(ApigwError::UnexpectedState {
                operation: "read parameter location".to_string(),
                state: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamType {
    #[default]
    String,
    Number,
}

/// Frontend request parameter
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestParam {
    pub name: String,
    pub location: ParamLocation,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validity_check: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub passthrough: bool,
    /// Maximum value for NUMBER, maximum length for STRING
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    /// Minimum value for NUMBER, minimum length for STRING
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct WireRequestParam {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_value: Option<String>,
    #[serde(default)]
    pub required: u8,
    #[serde(default)]
    pub valid_enable: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumerations: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_num: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    #[serde(default)]
    pub pass_through: u8,
}

/// Service booleans: 1 is on, 2 is off
pub(crate) fn flag(on: bool) -> u8 {
    if on {
        1
    } else {
        2
    }
}

pub(crate) fn is_on(flag: u8) -> bool {
    flag == 1
}

impl RequestParam {
    pub(crate) fn to_wire(&self) -> WireRequestParam {
        let (min_num, max_num, min_size, max_size) = match self.param_type {
            ParamType::Number => (self.minimum, self.maximum, None, None),
            ParamType::String => (None, None, self.minimum, self.maximum),
        };
        WireRequestParam {
            name: self.name.clone(),
            param_type: match self.param_type {
                ParamType::String => "STRING".to_string(),
                ParamType::Number => "NUMBER".to_string(),
            },
            location: self.location.wire().to_string(),
            default_value: self.default.clone(),
            sample_value: self.sample.clone(),
            required: flag(self.required),
            valid_enable: flag(self.validity_check),
            remark: self.description.clone(),
            enumerations: self.enumeration.clone(),
            min_num,
            max_num,
            min_size,
            max_size,
            pass_through: flag(self.passthrough),
        }
    }

    pub(crate) fn from_wire(wire: WireRequestParam) -> ApigwResult<Self> {
        let param_type = if wire.param_type.eq_ignore_ascii_case("NUMBER") {
            ParamType::Number
        } else {
            ParamType::String
        };
        let (minimum, maximum) = match param_type {
            ParamType::Number => (wire.min_num, wire.max_num),
            ParamType::String => (wire.min_size, wire.max_size),
        };
        Ok(Self {
            name: wire.name,
            location: ParamLocation::from_wire(&wire.location)?,
            param_type,
            required: is_on(wire.required),
            validity_check: is_on(wire.valid_enable),
            enumeration: non_empty(wire.enumerations),
            default: non_empty(wire.default_value),
            sample: non_empty(wire.sample_value),
            description: non_empty(wire.remark),
            passthrough: is_on(wire.pass_through),
            maximum,
            minimum,
        })
    }

    fn validate(&self) -> ApigwResult<()> {
        check_pattern(
            "request_params.name",
            &self.name,
            &PARAM_NAME,
            "1 to 32 letters, digits, '-', '_' or '.', starting with a letter",
        )?;
        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(ApigwError::validation(
                    "request_params.minimum",
                    format!("parameter '{}': minimum {} exceeds maximum {}", self.name, min, max),
                ));
            }
        }
        if let Some(description) = &self.description {
            check_max_len("request_params.description", description, 255)?;
        }
        if self.location == ParamLocation::Path && !self.required {
            return Err(ApigwError::validation(
                "request_params.required",
                format!("path parameter '{}' must be required", self.name),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendParamType {
    Request,
    Constant,
    System,
}

impl BackendParamType {
    fn wire(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Constant => "CONSTANT",
            Self::System => "SYSTEM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemParamType {
    Frontend,
    Backend,
    Internal,
}

/// Parameter injected into the backend request.
///
/// For `SYSTEM` parameters `value` names the system variable, e.g.
/// `sourceIp` or the authorizer context field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackendParam {
    #[serde(rename = "type")]
    pub param_type: BackendParamType,
    pub name: String,
    pub location: ParamLocation,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_param_type: Option<SystemParamType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct WireBackendParam {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

/// Wire value of a system parameter
pub fn system_value(system_param_type: SystemParamType, value: &str) -> String {
    match system_param_type {
        SystemParamType::Frontend => format!("$context.authorizer.frontend.{}", value),
        SystemParamType::Backend => format!("$context.authorizer.backend.{}", value),
        SystemParamType::Internal if INTERNAL_SYSTEM_PARAMS.contains(&value) => {
            format!("$context.{}", value)
        }
        SystemParamType::Internal => value.to_string(),
    }
}

/// Recover `(system_param_type, value)` from a wire value
pub fn parse_system_value(raw: &str) -> (SystemParamType, String) {
    if let Some(caps) = AUTHORIZER_VALUE.captures(raw) {
        let kind = if &caps[1] == "frontend" {
            SystemParamType::Frontend
        } else {
            SystemParamType::Backend
        };
        return (kind, caps[2].to_string());
    }
    if let Some(caps) = INTERNAL_VALUE.captures(raw) {
        if INTERNAL_SYSTEM_PARAMS.contains(&&caps[1]) {
            return (SystemParamType::Internal, caps[1].to_string());
        }
    }
    (SystemParamType::Internal, raw.to_string())
}

impl BackendParam {
    pub(crate) fn to_wire(&self) -> WireBackendParam {
        let value = match (self.param_type, self.system_param_type) {
            (BackendParamType::System, Some(kind)) => system_value(kind, &self.value),
            _ => self.value.clone(),
        };
        WireBackendParam {
            name: self.name.clone(),
            location: self.location.wire().to_string(),
            origin: self.param_type.wire().to_string(),
            value,
            remark: self.description.clone(),
        }
    }

    pub(crate) fn from_wire(wire: WireBackendParam) -> ApigwResult<Self> {
        let param_type = match wire.origin.to_ascii_uppercase().as_str() {
            "REQUEST" => BackendParamType::Request,
            "CONSTANT" => BackendParamType::Constant,
            "SYSTEM" => BackendParamType::System,
            other => {
                return Err(ApigwError::UnexpectedState {
                    operation: "read backend parameter origin".to_string(),
                    state: other.to_string(),
                })
            }
        };
        let (system_param_type, value) = if param_type == BackendParamType::System {
            let (kind, value) = parse_system_value(&wire.value);
            (Some(kind), value)
        } else {
            (None, wire.value)
        };
        Ok(Self {
            param_type,
            name: wire.name,
            location: ParamLocation::from_wire(&wire.location)?,
            value,
            system_param_type,
            description: non_empty(wire.remark),
        })
    }
}

pub(crate) fn request_params_to_wire(params: &BTreeSet<RequestParam>) -> Vec<WireRequestParam> {
    params.iter().map(RequestParam::to_wire).collect()
}

pub(crate) fn backend_params_to_wire(params: &BTreeSet<BackendParam>) -> Vec<WireBackendParam> {
    params.iter().map(BackendParam::to_wire).collect()
}

pub(crate) fn backend_params_from_wire(
    wire: Vec<WireBackendParam>,
) -> ApigwResult<BTreeSet<BackendParam>> {
    wire.into_iter().map(BackendParam::from_wire).collect()
}

/// Maximum number of parameters of either kind
pub const MAX_PARAMS: usize = 50;

pub(crate) fn validate_request_params(params: &BTreeSet<RequestParam>) -> ApigwResult<()> {
    if params.len() > MAX_PARAMS {
        return Err(ApigwError::validation(
            "request_params",
            format!("at most {} request parameters are allowed", MAX_PARAMS),
        ));
    }
    let mut seen = BTreeSet::new();
    for param in params {
        param.validate()?;
        if !seen.insert(param.name.as_str()) {
            return Err(ApigwError::validation(
                "request_params.name",
                format!("duplicate request parameter '{}'", param.name),
            ));
        }
    }
    Ok(())
}

/// `field` names the attribute in errors, e.g. `http_policies.backend_params`
pub(crate) fn validate_backend_params(
    field: &str,
    params: &BTreeSet<BackendParam>,
    request_params: &BTreeSet<RequestParam>,
) -> ApigwResult<()> {
    if params.len() > MAX_PARAMS {
        return Err(ApigwError::validation(
            field,
            format!("at most {} backend parameters are allowed", MAX_PARAMS),
        ));
    }
    for param in params {
        if param.name.trim().is_empty() {
            return Err(ApigwError::validation(field, "parameter name must not be empty"));
        }
        match param.param_type {
            BackendParamType::System if param.system_param_type.is_none() => {
                return Err(ApigwError::validation(
                    field,
                    format!("SYSTEM parameter '{}' requires system_param_type", param.name),
                ));
            }
            BackendParamType::Request
                if !request_params.iter().any(|req| req.name == param.value) =>
            {
                return Err(ApigwError::validation(
                    field,
                    format!(
                        "parameter '{}' maps unknown request parameter '{}'",
                        param.name, param.value
                    ),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}
