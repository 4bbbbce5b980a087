use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Request, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, trace};

use super::{Adapter, AskOptions, Codec, Completion, Delta, Exchange, StreamDecoder, ToolCallAssembler, json_post, parse_event};
use crate::error::{ModelError, Result};
use crate::ledger::Ledger;
use crate::message::{AskInput, AskResult, Message, StopReason};
use crate::model::{Provider, supports_thinking};
use crate::secret::Secret;
use crate::token::TokenUsage;
use crate::tool::{ToolChoice, ToolSpec};
use crate::transport::{HttpTransport, SseEvent, Transport};

const DONE_SENTINEL: &str = "[DONE]";

/// Configuration for the OpenAI provider
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API key for authentication
    pub api_key: Secret<String>,
    /// Base URL for the API
    pub base_url: String,
    /// Organization ID (optional)
    pub organization: Option<String>,
    /// Upper bound on one whole exchange
    pub request_timeout: Option<Duration>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::from_env("OPENAI_API_KEY"),
            base_url: "https://api.openai.com/v1".to_string(),
            organization: std::env::var("OPENAI_ORGANIZATION").ok(),
            request_timeout: None,
        }
    }
}

/// How hard a reasoning model thinks before answering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

/// OpenAI specific tuning for one `ask`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenAIOptions {
    pub max_completion_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub tool_choice: Option<ToolChoice>,
    /// Only accepted by reasoning models
    pub reasoning_effort: Option<ReasoningEffort>,
    pub parallel_tool_calls: Option<bool>,
    pub seed: Option<i64>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

/// Adapter for the OpenAI Chat Completions API
#[derive(Debug, Clone)]
pub struct OpenAIAdapter {
    model: String,
    config: OpenAIConfig,
    transport: Arc<dyn Transport>,
    ledger: Ledger,
}

impl OpenAIAdapter {
    /// Creates a new OpenAIAdapter with default configuration
    ///
    /// This method will use the OPENAI_API_KEY environment variable for authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::OpenAIAdapter;
    ///
    /// let adapter = OpenAIAdapter::new("gpt-4o-mini");
    /// ```
    #[instrument(skip_all, level = "debug")]
    pub fn new(model: impl Into<String>) -> Self {
        info!("Creating new OpenAIAdapter with default configuration");
        let config = OpenAIConfig::default();
        debug!("API key set: {}", !config.api_key.is_empty());
        debug!("Organization set: {}", config.organization.is_some());
        Self::build(model.into(), config)
    }

    /// Creates a new OpenAIAdapter with custom configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::{OpenAIAdapter, OpenAIConfig};
    ///
    /// let config = OpenAIConfig {
    ///     api_key: "your-api-key".into(),
    ///     base_url: "https://api.openai.com/v1".to_string(),
    ///     organization: None,
    ///     request_timeout: None,
    /// };
    ///
    /// let adapter = OpenAIAdapter::with_config("gpt-4o", config).unwrap();
    /// ```
    #[instrument(skip(config), level = "debug")]
    pub fn with_config(model: &str, config: OpenAIConfig) -> Result<Self> {
        info!("Creating new OpenAIAdapter with custom configuration");
        Url::parse(&config.base_url)?;
        debug!("API key set: {}", !config.api_key.is_empty());
        debug!("Base URL: {}", config.base_url);
        debug!("Organization set: {}", config.organization.is_some());
        Ok(Self::build(model.to_string(), config))
    }

    fn build(model: String, config: OpenAIConfig) -> Self {
        let transport = Arc::new(HttpTransport::new().with_timeout(config.request_timeout));
        Self {
            model,
            config,
            transport,
            ledger: Ledger::default(),
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }
}

#[async_trait]
impl Adapter for OpenAIAdapter {
    type Options = OpenAIOptions;

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn ask<'a>(&self, input: AskInput, options: AskOptions<'a, OpenAIOptions>) -> AskResult {
        super::run(self, input, options).await
    }
}

impl Codec for OpenAIAdapter {
    type Options = OpenAIOptions;
    type Decoder = OpenAIDecoder;

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn check(&self, options: &OpenAIOptions) -> std::result::Result<(), ModelError> {
        if options.reasoning_effort.is_some() && !supports_thinking(Provider::OpenAI, &self.model) {
            return Err(ModelError::invalid_request(format!(
                "model '{}' does not support reasoning_effort",
                self.model
            )));
        }
        Ok(())
    }

    fn encode(&self, exchange: &Exchange<'_, OpenAIOptions>) -> std::result::Result<Request, ModelError> {
        let payload = OpenAIRequest::from_exchange(exchange);
        debug!(
            messages = payload.messages.len(),
            tools = payload.tools.as_ref().map_or(0, Vec::len),
            "Built OpenAI payload"
        );

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let auth = format!("Bearer {}", self.config.api_key.expose());
        let mut headers = vec![("authorization", auth.as_str())];
        if let Some(org) = &self.config.organization {
            headers.push(("openai-organization", org.as_str()));
        }
        json_post(&url, &headers, &payload)
    }

    fn decoder(&self) -> OpenAIDecoder {
        OpenAIDecoder::default()
    }

    fn classify(&self, status: u16, retry_after: Option<Duration>, body: &str) -> ModelError {
        let message = serde_json::from_str::<OpenAIErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| body.to_string());
        ModelError::from_status(status, message, retry_after)
    }
}

/// Represents a message in the OpenAI API format
#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAIMessage {
    /// The role of the message sender (system, user, assistant, tool)
    pub role: &'static str,
    pub content: Option<OpenAIContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<OpenAIToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub(crate) enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAIImageUrl {
    pub url: String,
}

/// Represents a tool call in the OpenAI API format
#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAIToolCall {
    pub id: String,
    /// The type of the tool (currently always "function")
    pub r#type: &'static str,
    pub function: OpenAIFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct OpenAIFunctionCall {
    pub name: String,
    /// The arguments as a JSON string
    pub arguments: String,
}

/// Represents a tool in the OpenAI API format
#[derive(Debug, Serialize)]
pub(crate) struct OpenAITool {
    pub r#type: &'static str,
    pub function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAIFunction {
    pub name: String,
    pub description: String,
    /// The parameters schema as a JSON object
    pub parameters: Value,
}

impl From<&ToolSpec> for OpenAITool {
    fn from(spec: &ToolSpec) -> Self {
        OpenAITool {
            r#type: "function",
            function: OpenAIFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.json_schema.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAIStreamOptions {
    pub include_usage: bool,
}

/// Represents a request to the OpenAI API
#[derive(Debug, Serialize)]
pub(crate) struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    pub stream_options: OpenAIStreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAITool>>,
    /// Tool choice strategy (auto, required, none, or a specific function)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

/// Expands one log entry into OpenAI messages
///
/// A user turn carrying tool results becomes one `tool` message per result
/// followed by the user message itself, if it has any content.
fn to_openai_messages(msg: &Message, out: &mut Vec<OpenAIMessage>) {
    match msg {
        Message::User(user) => {
            out.extend(user.tool_results.iter().map(|result| OpenAIMessage {
                role: "tool",
                content: Some(OpenAIContent::Text(result.content.clone())),
                tool_calls: Vec::new(),
                tool_call_id: Some(result.tool_call_id.clone()),
            }));

            let text = user.content.as_ref().filter(|t| !t.is_empty());
            let content = if user.attachments.is_empty() {
                text.map(|t| OpenAIContent::Text(t.clone()))
            } else {
                let mut parts: Vec<OpenAIContentPart> = text
                    .map(|t| OpenAIContentPart::Text { text: t.clone() })
                    .into_iter()
                    .collect();
                parts.extend(user.attachments.iter().map(|attachment| OpenAIContentPart::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: attachment.data_url(),
                    },
                }));
                Some(OpenAIContent::Parts(parts))
            };
            if content.is_some() {
                out.push(OpenAIMessage {
                    role: "user",
                    content,
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                });
            }
        }
        Message::Assistant(assistant) => {
            let content = assistant
                .content
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|t| OpenAIContent::Text(t.clone()));
            let tool_calls: Vec<OpenAIToolCall> = assistant
                .tool_calls
                .iter()
                .map(|call| OpenAIToolCall {
                    id: call.id.clone(),
                    r#type: "function",
                    function: OpenAIFunctionCall {
                        name: call.name.clone(),
                        arguments: Value::Object(call.arguments.clone()).to_string(),
                    },
                })
                .collect();
            if content.is_some() || !tool_calls.is_empty() {
                out.push(OpenAIMessage {
                    role: "assistant",
                    content,
                    tool_calls,
                    tool_call_id: None,
                });
            }
        }
    }
}

impl OpenAIRequest {
    fn from_exchange(exchange: &Exchange<'_, OpenAIOptions>) -> Self {
        let options = exchange.options;
        let mut messages = Vec::new();
        if let Some(system) = exchange.system {
            messages.push(OpenAIMessage {
                role: "system",
                content: Some(OpenAIContent::Text(system.to_string())),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        for msg in exchange.messages() {
            to_openai_messages(msg, &mut messages);
        }

        let tools: Vec<OpenAITool> = exchange.tools.iter().map(OpenAITool::from).collect();
        let tool_choice = if tools.is_empty() {
            None
        } else {
            options.tool_choice.as_ref().map(|choice| match choice {
                ToolChoice::Auto => serde_json::json!("auto"),
                // OpenAI uses "required" for what we call "Any"
                ToolChoice::Any => serde_json::json!("required"),
                ToolChoice::None => serde_json::json!("none"),
                ToolChoice::Specific(name) => serde_json::json!({
                    "type": "function",
                    "function": { "name": name }
                }),
            })
        };

        OpenAIRequest {
            model: exchange.model.to_string(),
            messages,
            stream: true,
            stream_options: OpenAIStreamOptions { include_usage: true },
            max_completion_tokens: options.max_completion_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            parallel_tool_calls: options.parallel_tool_calls.filter(|_| !tools.is_empty()),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
            reasoning_effort: options.reasoning_effort,
            seed: options.seed,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

impl OpenAIErrorBody {
    fn into_model_error(self) -> ModelError {
        let code = self.code.as_ref().and_then(Value::as_str).unwrap_or_default();
        let kind = self.kind.as_deref().unwrap_or_default();
        match (kind, code) {
            (_, "rate_limit_exceeded") | ("rate_limit_error", _) | ("requests", _) | ("tokens", _) => {
                ModelError::rate_limit(self.message, None)
            }
            (_, "invalid_api_key") | ("authentication_error", _) => ModelError::auth(self.message),
            ("invalid_request_error", _) => ModelError::invalid_request(self.message),
            ("server_error", _) => ModelError::api_error(self.message, true),
            _ => ModelError::api_error(self.message, false),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIChunk {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    error: Option<OpenAIErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    #[serde(default)]
    delta: Option<OpenAIDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Folds `chat.completion.chunk` events
#[derive(Debug, Default)]
pub struct OpenAIDecoder {
    tools: ToolCallAssembler,
    usage: TokenUsage,
    finish_reason: Option<StopReason>,
    done: bool,
}

impl StreamDecoder for OpenAIDecoder {
    fn decode(&mut self, event: &SseEvent) -> std::result::Result<Vec<Delta>, ModelError> {
        if event.data.trim() == DONE_SENTINEL {
            trace!("OpenAI stream finished");
            self.done = true;
            return Ok(Vec::new());
        }

        let chunk: OpenAIChunk = parse_event(&event.data)?;
        if let Some(error) = chunk.error {
            return Err(error.into_model_error());
        }
        if let Some(usage) = chunk.usage {
            self.usage = TokenUsage::new(usage.prompt_tokens, usage.completion_tokens);
        }

        let mut deltas = Vec::new();
        for choice in chunk.choices {
            let delta = choice.delta.unwrap_or_default();
            if let Some(thinking) = delta.reasoning_content.or(delta.reasoning).filter(|t| !t.is_empty()) {
                deltas.push(Delta::Thinking(thinking));
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                deltas.push(Delta::Text(text));
            }
            for call in delta.tool_calls {
                let (name, arguments) = call
                    .function
                    .map(|f| (f.name, f.arguments))
                    .unwrap_or_default();
                self.tools.start(call.index, call.id, name);
                if let Some(arguments) = arguments {
                    self.tools.append_arguments(call.index, &arguments);
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(match reason.as_str() {
                    "length" => StopReason::MaxTokens,
                    "tool_calls" | "function_call" => StopReason::ToolCall,
                    _ => StopReason::Complete,
                });
            }
        }
        Ok(deltas)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn saw_terminal(&self) -> bool {
        self.done || self.finish_reason.is_some()
    }

    fn finish(self) -> std::result::Result<Completion, ModelError> {
        Ok(Completion {
            thinking_signature: None,
            thinking_blocks: Vec::new(),
            tool_calls: self.tools.finish(self.finish_reason == Some(StopReason::MaxTokens))?,
            usage: self.usage,
            stop_reason: self.finish_reason,
        })
    }
}
