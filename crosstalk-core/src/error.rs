use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed vendor exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelErrorKind {
    /// The vendor throttled the request
    RateLimit,
    /// Credentials were missing, invalid, or lacked permission
    Auth,
    /// The request never produced a terminal response (connection, timeout, cancellation)
    Network,
    /// The vendor failed while handling a well-formed request
    ApiError,
    /// The request itself was rejected, or could not be built
    InvalidRequest,
}

impl ModelErrorKind {
    /// Returns the wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelErrorKind::RateLimit => "rate_limit",
            ModelErrorKind::Auth => "auth",
            ModelErrorKind::Network => "network",
            ModelErrorKind::ApiError => "api_error",
            ModelErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

/// A vendor or request level failure, returned as data from `ask()`
///
/// The runtime never retries on its own. `retryable` and `retry_after` are
/// hints for whatever retry policy the caller layers on top.
///
/// # Examples
///
/// ```
/// use crosstalk_core::error::{ModelError, ModelErrorKind};
/// use std::time::Duration;
///
/// let err = ModelError::rate_limit("slow down", Some(Duration::from_secs(20)));
/// assert_eq!(err.kind, ModelErrorKind::RateLimit);
/// assert!(err.retryable);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{} error: {message}", kind.as_str())]
#[serde(rename_all = "camelCase")]
pub struct ModelError {
    /// What went wrong
    #[serde(rename = "type")]
    pub kind: ModelErrorKind,
    /// Human readable description, usually the vendor's own message
    pub message: String,
    /// Whether repeating the same request may succeed
    pub retryable: bool,
    /// How long the vendor asked us to wait before retrying
    #[serde(default, skip_serializing_if = "Option::is_none", with = "duration_millis")]
    pub retry_after: Option<Duration>,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ModelErrorKind::RateLimit, message, true)
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Auth, message, false)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Network, message, true)
    }

    pub fn api_error(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(ModelErrorKind::ApiError, message, retryable)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::InvalidRequest, message, false)
    }

    /// The error reported when the caller's cancellation token fires mid-exchange
    pub fn cancelled() -> Self {
        Self::new(ModelErrorKind::Network, "request was cancelled", false)
    }

    /// Maps an HTTP status code onto the error taxonomy
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::error::{ModelError, ModelErrorKind};
    ///
    /// let err = ModelError::from_status(401, "bad key", None);
    /// assert_eq!(err.kind, ModelErrorKind::Auth);
    /// assert!(!err.retryable);
    /// ```
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            429 => Self::rate_limit(message, retry_after),
            401 | 403 => Self::auth(message),
            400 | 404 | 409 | 413 | 422 => Self::invalid_request(message),
            408 => Self::network(message),
            500..=599 => Self::api_error(message, true),
            _ => Self::api_error(message, false),
        }
    }
}

/// Classification of a failed tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The tool ran and reported an error, or panicked
    ExecutionFailed,
    /// The tool is unknown, or its arguments did not match the schema
    InvalidArgs,
    /// A remote tool server reported a failure
    McpError,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::ExecutionFailed => "execution_failed",
            ToolErrorKind::InvalidArgs => "invalid_args",
            ToolErrorKind::McpError => "mcp_error",
        }
    }
}

/// Errors that can occur when executing tools
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("tool '{tool_name}' {}: {message}", kind.as_str())]
#[serde(rename_all = "camelCase")]
pub struct ToolError {
    #[serde(rename = "type")]
    pub kind: ToolErrorKind,
    pub message: String,
    pub tool_name: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn execution_failed(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ExecutionFailed, tool_name, message)
    }

    pub fn invalid_args(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArgs, tool_name, message)
    }

    pub fn mcp_error(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::McpError, tool_name, message)
    }
}

/// Fatal configuration errors in the crosstalk library
///
/// These indicate a contract problem between the caller and the runtime
/// (a tool registered twice, a snapshot that no longer matches the running
/// application) rather than something a retry could fix.
#[derive(Error, Debug)]
pub enum Error {
    /// Error during serialization or deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Couldn't parse base url")]
    BaseUrlError(#[from] url::ParseError),

    /// A tool with this name is already registered
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// A serialized tool has no matching definition among those provided
    #[error("Tool not found: {0}")]
    MissingTool(String),

    /// A tool definition's argument schema differs from the serialized one
    #[error("Schema mismatch for tool '{tool}': expected {expected}, found {found}")]
    SchemaMismatch {
        tool: String,
        expected: serde_json::Value,
        found: serde_json::Value,
    },

    /// A document handed in as a tool schema is not valid JSON Schema
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

/// A Result type that uses our Error type
pub type Result<T> = std::result::Result<T, Error>;

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parameterized::parameterized;

    #[parameterized(
        status = { 429, 401, 403, 400, 404, 422, 408, 500, 529, 418 },
        kind = {
            ModelErrorKind::RateLimit,
            ModelErrorKind::Auth,
            ModelErrorKind::Auth,
            ModelErrorKind::InvalidRequest,
            ModelErrorKind::InvalidRequest,
            ModelErrorKind::InvalidRequest,
            ModelErrorKind::Network,
            ModelErrorKind::ApiError,
            ModelErrorKind::ApiError,
            ModelErrorKind::ApiError
        },
        retryable = { true, false, false, false, false, false, true, true, true, false }
    )]
    fn test_status_classification(status: u16, kind: ModelErrorKind, retryable: bool) {
        let err = ModelError::from_status(status, "boom", None);
        assert_eq!(err.kind, kind);
        assert_eq!(err.retryable, retryable);
    }

    #[test]
    fn test_retry_after_only_kept_for_rate_limits() {
        let hint = Some(Duration::from_secs(3));
        assert_eq!(ModelError::from_status(429, "x", hint).retry_after, hint);
        assert_eq!(ModelError::from_status(500, "x", hint).retry_after, None);
    }

    #[test]
    fn test_model_error_serialization() {
        let err = ModelError::rate_limit("slow down", Some(Duration::from_millis(1500)));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "rate_limit");
        assert_eq!(value["retryAfter"], 1500);

        let back: ModelError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_error_display() {
        let err = ToolError::invalid_args("calculator", "missing field `a`");
        assert_eq!(
            err.to_string(),
            "tool 'calculator' invalid_args: missing field `a`"
        );
        assert_eq!(
            Error::MissingTool("calculator".into()).to_string(),
            "Tool not found: calculator"
        );
    }
}
