//! Tool trait and schema types.
//!
//! Tools are what give the agent the ability to act in the world:
//! read and write files, run allowlisted commands, search the web.
//! Every tool declares a `ToolDefinition`; the registry validates each
//! call against it before the implementation ever sees the arguments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::ToolError;
use crate::provider::ToolSchema;

/// Validated keyword arguments handed to a tool.
pub type ToolArguments = Map<String, Value>;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the call with its tool-result message
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Failure classes a `ToolResult` can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    NotFound,
    InvalidArguments,
    RateLimited,
    Timeout,
    PermissionDenied,
    Execution,
    Unavailable,
}

impl From<&ToolError> for ToolErrorKind {
    fn from(err: &ToolError) -> Self {
        match err {
            ToolError::NotFound(_) => Self::NotFound,
            ToolError::InvalidArguments { .. } => Self::InvalidArguments,
            ToolError::RateLimited { .. } => Self::RateLimited,
            ToolError::Timeout { .. } => Self::Timeout,
            ToolError::PermissionDenied { .. } => Self::PermissionDenied,
            ToolError::ExecutionFailed { .. } => Self::Execution,
            ToolError::Unavailable { .. } => Self::Unavailable,
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    /// Output on success, empty on failure
    pub output: String,

    /// Human-readable failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            error_kind: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// A failed result built from a tool error. Only the error's display
    /// text is kept.
    pub fn failure(err: &ToolError) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(err.to_string()),
            error_kind: Some(ToolErrorKind::from(err)),
            data: None,
        }
    }

    /// Text fed back to the model as the tool message content.
    pub fn to_message_content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("tool failed"))
        }
    }
}

/// JSON-schema-like type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ToolParameter {
    /// A required parameter of the given type.
    pub fn new(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::String, description)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer, description)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Sets a default; parameters with defaults are never required.
    pub fn with_default(mut self, value: Value) -> Self {
        self.required = false;
        self.default = Some(value);
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Static schema of a tool. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    /// Reject arguments that are not declared parameters.
    #[serde(default)]
    pub strict: bool,
}

impl ToolDefinition {
    /// Check `arguments` against the declared parameters.
    ///
    /// Returns the sanitized argument map: declared parameters only, with
    /// defaults filled in. `null` counts as absent.
    pub fn validate(&self, arguments: &ToolArguments) -> Result<ToolArguments, ToolError> {
        let mut sanitized = Map::new();

        for param in &self.parameters {
            match arguments.get(&param.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    if !param.param_type.matches(value) {
                        return Err(ToolError::invalid(
                            &self.name,
                            format!(
                                "parameter '{}' must be of type {}",
                                param.name,
                                param.param_type.as_str()
                            ),
                        ));
                    }
                    if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            return Err(ToolError::invalid(
                                &self.name,
                                format!(
                                    "parameter '{}' must be one of {}",
                                    param.name,
                                    Value::Array(allowed.clone())
                                ),
                            ));
                        }
                    }
                    sanitized.insert(param.name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &param.default {
                        sanitized.insert(param.name.clone(), default.clone());
                    } else if param.required {
                        return Err(ToolError::invalid(
                            &self.name,
                            format!("missing required parameter '{}'", param.name),
                        ));
                    }
                }
            }
        }

        let extra: Vec<&str> = arguments
            .keys()
            .filter(|k| !self.parameters.iter().any(|p| &p.name == *k))
            .map(|k| k.as_str())
            .collect();
        if !extra.is_empty() {
            if self.strict {
                return Err(ToolError::invalid(
                    &self.name,
                    format!("unexpected parameter(s): {}", extra.join(", ")),
                ));
            }
            tracing::debug!(tool = %self.name, ?extra, "Dropping undeclared tool arguments");
        }

        Ok(sanitized)
    }

    /// JSON Schema of the parameters, as sent to providers.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::from(param.param_type.as_str()));
            prop.insert("description".into(), Value::from(param.description.clone()));
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(Value::from(param.name.clone()));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".into(), Value::from("object"));
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), Value::Array(required));
        if self.strict {
            schema.insert("additionalProperties".into(), Value::Bool(false));
        }
        Value::Object(schema)
    }

    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.json_schema(),
        }
    }
}

/// The core Tool trait.
///
/// Implementations receive arguments that already passed validation
/// against `definition()`. Returning `Err` is fine; the registry turns it
/// into a failed `ToolResult`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ToolParameter>;

    /// Whether undeclared arguments are rejected.
    fn strict(&self) -> bool {
        false
    }

    /// Per-tool execution timeout, overriding the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<ToolResult, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            strict: self.strict(),
        }
    }
}
