//! Tool description, input and envelope types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bound parameters passed to a tool invocation
pub type Params = Map<String, Value>;

/// Declared parameter of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// JSON type name ("string", "integer", "array", ...)
    #[serde(default = "default_param_type", rename = "type")]
    pub param_type: String,
}

fn default_param_type() -> String {
    "string".to_string()
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: true,
            param_type: param_type.into(),
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: false,
            param_type: param_type.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Permissions a tool needs to run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPermissions {
    #[serde(default)]
    pub network: bool,

    #[serde(default)]
    pub filesystem: bool,

    #[serde(default)]
    pub write: bool,
}

impl ToolPermissions {
    /// Comma-separated list of granted capabilities, or "none"
    pub fn describe(&self) -> String {
        let granted: Vec<&str> = [
            (self.network, "network"),
            (self.filesystem, "filesystem"),
            (self.write, "write"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();
        if granted.is_empty() {
            "none".to_string()
        } else {
            granted.join(", ")
        }
    }
}

/// Read-only description of a callable capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,

    #[serde(default)]
    pub parameters: Vec<ParamSpec>,

    #[serde(default)]
    pub permissions: ToolPermissions,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            permissions: ToolPermissions::default(),
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_permissions(mut self, permissions: ToolPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Whether the tool declares a parameter with this exact name
    pub fn accepts(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.parameters.iter().filter(|p| p.required)
    }

    /// One-line signature, e.g. `get_activity(activity_id: integer, include?: string)`
    pub fn signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.param_type)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, params)
    }
}

/// Input to a tool function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    pub params: Params,
}

impl ToolInput {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an i64 parameter, accepting numeric strings
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        match self.params.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| ToolError::InvalidParameter(key.to_string())),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| ToolError::InvalidParameter(key.to_string())),
            Some(_) => Err(ToolError::InvalidParameter(key.to_string())),
            None => Err(ToolError::MissingParameter(key.to_string())),
        }
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional i64 parameter
    pub fn param_i64_opt(&self, key: &str) -> Option<i64> {
        self.param_i64(key).ok()
    }

    /// Get a parameter as a JSON value
    pub fn param_json(&self, key: &str) -> Result<&Value, ToolError> {
        self.params
            .get(key)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }
}

/// Structured success/error envelope a tool may return instead of a raw value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub success: bool,

    #[serde(default)]
    pub error: Option<String>,

    /// Whether the caller may retry with different parameters
    #[serde(default)]
    pub retry: bool,

    #[serde(default)]
    pub hint: Option<String>,
}

impl ToolEnvelope {
    /// Create a failure envelope
    pub fn failure(error: impl Into<String>, retry: bool, hint: Option<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            retry,
            hint,
        }
    }

    /// Interpret a raw tool result as a failure envelope.
    ///
    /// Only objects with `success: false` qualify; everything else is a raw
    /// value (or a success envelope) and yields `None`.
    pub fn failure_from(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get("success").and_then(Value::as_bool) != Some(false) {
            return None;
        }
        Some(Self {
            success: false,
            error: obj.get("error").map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            retry: obj.get("retry").and_then(Value::as_bool).unwrap_or(false),
            hint: obj.get("hint").and_then(Value::as_str).map(String::from),
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Errors raised by tools
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing required parameter `{0}`")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Execution(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_spec_signature() {
        let spec = ToolSpec::new("get_activity", "Fetch one activity")
            .with_param(ParamSpec::required("activity_id", "integer"))
            .with_param(ParamSpec::optional("include", "string"));

        assert_eq!(
            spec.signature(),
            "get_activity(activity_id: integer, include?: string)"
        );
        assert!(spec.accepts("activity_id"));
        assert!(!spec.accepts("id"));
        assert_eq!(spec.required_params().count(), 1);
    }

    #[test]
    fn test_param_i64_accepts_numeric_string() {
        let input = ToolInput::default()
            .with_param("a", json!(42))
            .with_param("b", json!("16243029035"))
            .with_param("c", json!("nope"));

        assert_eq!(input.param_i64("a").unwrap(), 42);
        assert_eq!(input.param_i64("b").unwrap(), 16243029035);
        assert!(matches!(
            input.param_i64("c"),
            Err(ToolError::InvalidParameter(_))
        ));
        assert!(matches!(
            input.param_i64("d"),
            Err(ToolError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_param_str_opt() {
        let input = ToolInput::default().with_param("name", json!("Bob"));
        assert_eq!(input.param_str_opt("name"), Some("Bob".to_string()));
        assert_eq!(input.param_str_opt("missing"), None);
    }

    #[test]
    fn test_envelope_failure_detection() {
        let raw = json!({"success": false, "error": "rate limited", "retry": true, "hint": "wait"});
        let env = ToolEnvelope::failure_from(&raw).unwrap();
        assert!(env.retry);
        assert_eq!(env.error.as_deref(), Some("rate limited"));
        assert_eq!(env.hint.as_deref(), Some("wait"));

        assert!(ToolEnvelope::failure_from(&json!({"success": true})).is_none());
        assert!(ToolEnvelope::failure_from(&json!([1, 2, 3])).is_none());
        assert!(ToolEnvelope::failure_from(&json!({"error": "x"})).is_none());
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::MissingParameter("activity_id".to_string());
        assert_eq!(err.to_string(), "missing required parameter `activity_id`");

        let err = ToolError::NotFound("Activity 12".to_string());
        assert_eq!(err.to_string(), "Activity 12 not found");
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: ToolSpec = serde_json::from_value(json!({
            "name": "list_items",
            "description": "List items",
            "parameters": [{"name": "limit"}]
        }))
        .unwrap();
        assert_eq!(spec.parameters[0].param_type, "string");
        assert!(!spec.parameters[0].required);
        assert_eq!(spec.permissions, ToolPermissions::default());
        assert_eq!(spec.permissions.describe(), "none");
    }

    #[test]
    fn test_permissions_describe_granted_capabilities() {
        let permissions = ToolPermissions {
            network: true,
            filesystem: false,
            write: true,
        };
        assert_eq!(permissions.describe(), "network, write");
    }
}
