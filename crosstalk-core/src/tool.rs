use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[cfg(feature = "schema")]
use async_trait::async_trait;
#[cfg(feature = "schema")]
use schemars::JsonSchema;
#[cfg(feature = "schema")]
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::schema::Schema;

/// Error type tool bodies may fail with
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A tool body's way of saying its arguments were unusable
///
/// The registry reports a call that fails with this error as `invalid_args`
/// rather than `execution_failed`. Typed tools return it when the arguments
/// do not deserialize into their input type.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct InvalidArguments(pub String);

/// The future a tool body returns
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>;

/// Object safe view of a tool body closure
trait ToolExecutor: Send + Sync {
    fn call(&self, args: Value, cancel: CancellationToken) -> ToolFuture;
}

impl<F, Fut> ToolExecutor for F
where
    F: Fn(Value, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    fn call(&self, args: Value, cancel: CancellationToken) -> ToolFuture {
        Box::pin(self(args, cancel))
    }
}

/// A named unit of caller supplied work the model can invoke
///
/// The body receives the validated arguments and a cancellation token that
/// fires when the caller gives up on the call; long running bodies should
/// watch it.
///
/// # Examples
///
/// ```
/// use crosstalk_core::{Schema, ToolDefinition};
/// use serde_json::{Value, json};
///
/// let add = ToolDefinition::new(
///     "add",
///     "Adds two numbers",
///     Schema::object()
///         .required_property("a", Schema::number())
///         .required_property("b", Schema::number()),
///     |args: Value, _cancel| async move {
///         let a = args["a"].as_f64().unwrap_or_default();
///         let b = args["b"].as_f64().unwrap_or_default();
///         Ok(json!(a + b))
///     },
/// );
/// assert_eq!(add.name, "add");
/// ```
#[derive(Clone)]
pub struct ToolDefinition {
    /// Registry key, unique within a context
    pub name: String,
    pub description: String,
    pub schema: Schema,
    executor: Arc<dyn ToolExecutor>,
}

impl ToolDefinition {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Schema,
        executor: F,
    ) -> Self
    where
        F: Fn(Value, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            executor: Arc::new(executor),
        }
    }

    /// Wraps a [`TypedTool`], deriving its schema from `T::Input`
    ///
    /// Fails only when the derived JSON Schema cannot be serialized.
    #[cfg(feature = "schema")]
    pub fn typed<T: TypedTool>(tool: T) -> crate::error::Result<Self> {
        let schema = Schema::for_type::<T::Input>()?;
        let name = tool.name();
        let description = tool.description();
        let tool = Arc::new(tool);
        Ok(Self::new(
            name,
            description,
            schema,
            move |args: Value, cancel: CancellationToken| {
                let tool = Arc::clone(&tool);
                async move {
                    let input: T::Input =
                        serde_json::from_value(args).map_err(|e| InvalidArguments(e.to_string()))?;
                    let output = tool.call(input, cancel).await?;
                    Ok::<Value, BoxError>(serde_json::to_value(output)?)
                }
            },
        ))
    }

    /// Runs the tool body without validating `args`
    ///
    /// The registry validates before calling this; direct callers are on
    /// their own.
    pub fn invoke(&self, args: Value, cancel: CancellationToken) -> ToolFuture {
        self.executor.call(args, cancel)
    }

    /// The serializable description of this tool
    pub fn spec(&self) -> ToolSpec {
        ToolSpec::from(self)
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Core trait for defining tools with associated input and output types
///
/// The argument schema is derived from `Input` with `schemars`, and
/// arguments are deserialized into `Input` before `call` runs.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use crosstalk_core::{BoxError, ToolDefinition, TypedTool};
/// use schemars::JsonSchema;
/// use serde::{Deserialize, Serialize};
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Debug, Deserialize, JsonSchema)]
/// struct WeatherRequest {
///     location: String,
///     units: Option<String>,
/// }
///
/// #[derive(Debug, Serialize)]
/// struct WeatherResponse {
///     temperature: f64,
///     condition: String,
/// }
///
/// struct WeatherTool;
///
/// #[async_trait]
/// impl TypedTool for WeatherTool {
///     type Input = WeatherRequest;
///     type Output = WeatherResponse;
///
///     fn name(&self) -> String {
///         "get_weather".to_string()
///     }
///
///     fn description(&self) -> String {
///         "Get current weather for a location".to_string()
///     }
///
///     async fn call(&self, _input: WeatherRequest, _cancel: CancellationToken) -> Result<WeatherResponse, BoxError> {
///         Ok(WeatherResponse { temperature: 22.5, condition: "Sunny".into() })
///     }
/// }
///
/// let tool = ToolDefinition::typed(WeatherTool).unwrap();
/// assert_eq!(tool.name, "get_weather");
/// ```
#[cfg(feature = "schema")]
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    /// The input type that this tool accepts
    type Input: DeserializeOwned + JsonSchema + Send + 'static;

    /// The output type that this tool produces
    type Output: Serialize + Send + 'static;

    fn name(&self) -> String;

    fn description(&self) -> String;

    async fn call(
        &self,
        input: Self::Input,
        cancel: CancellationToken,
    ) -> Result<Self::Output, BoxError>;
}

/// Name, description and canonical argument schema of a tool
///
/// This is what adapters advertise to vendors and what a serialized context
/// stores in place of the executable definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub json_schema: Value,
}

impl From<&ToolDefinition> for ToolSpec {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            json_schema: def.schema.canonical(),
        }
    }
}

/// Represents the tool choice strategy for LLMs
///
/// This enum provides a provider-agnostic API for tool choice, mapping to
/// different provider-specific parameters:
///
/// - OpenAI: Maps to "auto", "required", "none", or a function object
/// - Anthropic: Maps to "auto", "any", "none", or a tool object
/// - Google: Maps to function_calling_config modes and allowed_function_names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// Allow the model to choose which tool to use (or none)
    #[default]
    Auto,
    /// Require the model to use one of the available tools
    Any,
    /// Force the model not to use any tools
    None,
    /// Require the model to use a specific tool by name
    Specific(String),
}
