use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Request, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, trace, warn};

use super::{Adapter, AskOptions, Codec, Completion, Delta, Exchange, StreamDecoder, ToolCallAssembler, json_post, parse_event};
use crate::error::{ModelError, Result};
use crate::ledger::Ledger;
use crate::message::{AskInput, AskResult, Message, StopReason, ThinkingBlock};
use crate::model::{Provider, capabilities, supports_thinking};
use crate::secret::Secret;
use crate::token::TokenUsage;
use crate::tool::{ToolChoice, ToolSpec};
use crate::transport::{HttpTransport, SseEvent, Transport};

const DEFAULT_THINKING_BUDGET: u32 = 4096;

/// Configuration for the Anthropic provider
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication
    pub api_key: Secret<String>,
    /// Base URL for the API
    pub base_url: String,
    /// Value of the `anthropic-version` header
    pub api_version: String,
    /// Upper bound on one whole exchange
    pub request_timeout: Option<Duration>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::from_env("ANTHROPIC_API_KEY"),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_version: "2023-06-01".to_string(),
            request_timeout: None,
        }
    }
}

/// Anthropic specific tuning for one `ask`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnthropicOptions {
    /// Defaults to the model's output limit
    pub max_tokens: Option<u32>,
    /// Requests extended thinking; only models that support it accept this
    pub thinking_enabled: bool,
    pub max_thinking_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub tool_choice: Option<ToolChoice>,
    pub service_tier: Option<String>,
}

/// Adapter for the Anthropic Messages API
///
/// # Examples
///
/// ```
/// use crosstalk_core::{Adapter, AnthropicAdapter, Provider};
///
/// let adapter = AnthropicAdapter::new("claude-3-5-haiku-20241022");
/// assert_eq!(adapter.provider(), Provider::Anthropic);
/// assert_eq!(adapter.model(), "claude-3-5-haiku-20241022");
/// ```
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    model: String,
    config: AnthropicConfig,
    transport: Arc<dyn Transport>,
    ledger: Ledger,
}

impl AnthropicAdapter {
    /// Creates an adapter with configuration from the environment
    ///
    /// This method will use the ANTHROPIC_API_KEY environment variable for authentication.
    #[instrument(skip_all, level = "debug")]
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        info!("Creating new AnthropicAdapter with default configuration");
        let config = AnthropicConfig::default();
        debug!("API key set: {}", !config.api_key.is_empty());
        Self::build(model, config)
    }

    /// Creates an adapter with a custom configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::{AnthropicAdapter, AnthropicConfig};
    ///
    /// let config = AnthropicConfig {
    ///     api_key: "your-api-key".into(),
    ///     ..Default::default()
    /// };
    /// let adapter = AnthropicAdapter::with_config("claude-sonnet-4-20250514", config).unwrap();
    ///
    /// let bad = AnthropicConfig { base_url: "not a url".into(), ..Default::default() };
    /// assert!(AnthropicAdapter::with_config("claude-sonnet-4-20250514", bad).is_err());
    /// ```
    #[instrument(skip(config), level = "debug")]
    pub fn with_config(model: &str, config: AnthropicConfig) -> Result<Self> {
        info!("Creating new AnthropicAdapter with custom configuration");
        Url::parse(&config.base_url)?;
        debug!("Base URL: {}", config.base_url);
        debug!("API key set: {}", !config.api_key.is_empty());
        Ok(Self::build(model.to_string(), config))
    }

    fn build(model: String, config: AnthropicConfig) -> Self {
        let transport = Arc::new(HttpTransport::new().with_timeout(config.request_timeout));
        Self {
            model,
            config,
            transport,
            ledger: Ledger::default(),
        }
    }

    /// Sends requests through `transport` instead of HTTP
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Prices exchanges made without a context
    #[must_use]
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    type Options = AnthropicOptions;

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn ask<'a>(&self, input: AskInput, options: AskOptions<'a, AnthropicOptions>) -> AskResult {
        super::run(self, input, options).await
    }
}

impl Codec for AnthropicAdapter {
    type Options = AnthropicOptions;
    type Decoder = AnthropicDecoder;

    fn provider(&self) -> Provider {
        Provider::Anthropic
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

    fn check(&self, options: &AnthropicOptions) -> std::result::Result<(), ModelError> {
        if options.thinking_enabled && !supports_thinking(Provider::Anthropic, &self.model) {
            return Err(ModelError::invalid_request(format!(
                "model '{}' does not support extended thinking",
                self.model
            )));
        }
        Ok(())
    }

    fn encode(&self, exchange: &Exchange<'_, AnthropicOptions>) -> std::result::Result<Request, ModelError> {
        let payload = AnthropicRequest::from_exchange(exchange);
        debug!(
            messages = payload.messages.len(),
            tools = payload.tools.as_ref().map_or(0, Vec::len),
            thinking = payload.thinking.is_some(),
            "Built Anthropic payload"
        );
        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));
        json_post(
            &url,
            &[
                ("x-api-key", self.config.api_key.expose()),
                ("anthropic-version", &self.config.api_version),
            ],
            &payload,
        )
    }

    fn decoder(&self) -> AnthropicDecoder {
        AnthropicDecoder::default()
    }

    fn classify(&self, status: u16, retry_after: Option<Duration>, body: &str) -> ModelError {
        let message = serde_json::from_str::<AnthropicErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| body.to_string());
        ModelError::from_status(status, message, retry_after)
    }
}

/// Maps an Anthropic `error.type` onto the error taxonomy
fn error_from_type(error_type: &str, message: String) -> ModelError {
    match error_type {
        "rate_limit_error" => ModelError::rate_limit(message, None),
        "authentication_error" | "permission_error" => ModelError::auth(message),
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            ModelError::invalid_request(message)
        }
        "overloaded_error" | "api_error" => ModelError::api_error(message, true),
        _ => ModelError::api_error(message, false),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<AnthropicThinking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicThinking {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub budget_tokens: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicBlock>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicImageSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicBlock {
    Text {
        text: String,
    },
    Image {
        source: AnthropicImageSource,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<&ToolSpec> for AnthropicTool {
    fn from(spec: &ToolSpec) -> Self {
        AnthropicTool {
            name: spec.name.clone(),
            description: spec.description.clone(),
            input_schema: spec.json_schema.clone(),
        }
    }
}

/// Converts one log entry into Anthropic's block form
///
/// User blocks go tool results first, as the API requires, then images,
/// then text. Thinking is replayed only when it carries an Anthropic
/// signature.
impl From<&Message> for AnthropicMessage {
    fn from(msg: &Message) -> Self {
        let mut content = Vec::new();
        match msg {
            Message::User(user) => {
                content.extend(user.tool_results.iter().map(|result| AnthropicBlock::ToolResult {
                    tool_use_id: result.tool_call_id.clone(),
                    content: result.content.clone(),
                    is_error: result.is_error,
                }));
                content.extend(user.attachments.iter().map(|attachment| AnthropicBlock::Image {
                    source: AnthropicImageSource {
                        kind: "base64",
                        media_type: attachment.mime_type.clone(),
                        data: attachment.data.clone(),
                    },
                }));
                if let Some(text) = user.content.as_ref().filter(|t| !t.is_empty()) {
                    content.push(AnthropicBlock::Text { text: text.clone() });
                }
                AnthropicMessage {
                    role: "user",
                    content,
                }
            }
            Message::Assistant(assistant) => {
                if assistant.provider == Provider::Anthropic {
                    if !assistant.thinking_blocks.is_empty() {
                        content.extend(assistant.thinking_blocks.iter().map(|block| AnthropicBlock::Thinking {
                            thinking: block.thinking.clone(),
                            signature: block.signature.clone(),
                        }));
                    } else if let (Some(thinking), Some(signature)) =
                        (&assistant.thinking, &assistant.thinking_signature)
                    {
                        content.push(AnthropicBlock::Thinking {
                            thinking: thinking.clone(),
                            signature: signature.clone(),
                        });
                    }
                }
                if let Some(text) = assistant.content.as_ref().filter(|t| !t.is_empty()) {
                    content.push(AnthropicBlock::Text { text: text.clone() });
                }
                content.extend(assistant.tool_calls.iter().map(|call| AnthropicBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                AnthropicMessage {
                    role: "assistant",
                    content,
                }
            }
        }
    }
}

impl AnthropicRequest {
    fn from_exchange(exchange: &Exchange<'_, AnthropicOptions>) -> Self {
        let options = exchange.options;
        let messages = exchange
            .messages()
            .map(AnthropicMessage::from)
            .filter(|msg| !msg.content.is_empty())
            .collect();

        let tools: Vec<AnthropicTool> = exchange.tools.iter().map(AnthropicTool::from).collect();
        let tool_choice = if tools.is_empty() {
            None
        } else {
            options.tool_choice.as_ref().map(|choice| match choice {
                ToolChoice::Auto => serde_json::json!({"type": "auto"}),
                ToolChoice::Any => serde_json::json!({"type": "any"}),
                ToolChoice::None => serde_json::json!({"type": "none"}),
                ToolChoice::Specific(name) => serde_json::json!({"type": "tool", "name": name}),
            })
        };

        let mut max_tokens = options.max_tokens.unwrap_or_else(|| {
            u32::try_from(capabilities(Provider::Anthropic, exchange.model).max_output_tokens).unwrap_or(u32::MAX)
        });
        let thinking = options.thinking_enabled.then(|| {
            let budget = options.max_thinking_tokens.unwrap_or(DEFAULT_THINKING_BUDGET);
            // The API requires room for an answer beyond the thinking budget
            if max_tokens <= budget {
                max_tokens = budget.saturating_add(max_tokens);
            }
            AnthropicThinking {
                kind: "enabled",
                budget_tokens: budget,
            }
        });

        AnthropicRequest {
            model: exchange.model.to_string(),
            max_tokens,
            system: exchange.system.map(str::to_string),
            messages,
            stream: true,
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
            thinking,
            temperature: options.temperature,
            top_k: options.top_k,
            top_p: options.top_p,
            stop_sequences: options.stop_sequences.clone(),
            service_tier: options.service_tier.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorEnvelope {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStartMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicStartMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: AnthropicContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: AnthropicBlockDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        delta: AnthropicMessageDelta,
        #[serde(default)]
        usage: AnthropicUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicErrorBody,
    },
    #[serde(other)]
    Unknown,
}

/// Folds Anthropic's typed stream events
#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    tools: ToolCallAssembler,
    /// Reasoning blocks keyed by content block index
    thinking: BTreeMap<usize, ThinkingBlock>,
    usage: TokenUsage,
    stop_reason: Option<StopReason>,
    done: bool,
}

impl StreamDecoder for AnthropicDecoder {
    fn decode(&mut self, event: &SseEvent) -> std::result::Result<Vec<Delta>, ModelError> {
        trace!(event = ?event.event, "Anthropic stream event");
        let parsed: AnthropicStreamEvent = parse_event(&event.data)?;
        let mut deltas = Vec::new();
        match parsed {
            AnthropicStreamEvent::MessageStart { message } => {
                let usage = message.usage;
                self.usage.input = usage.input_tokens.unwrap_or_default()
                    + usage.cache_creation_input_tokens.unwrap_or_default()
                    + usage.cache_read_input_tokens.unwrap_or_default();
                self.usage.output = usage.output_tokens.unwrap_or_default();
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                AnthropicContentBlock::Text { text } if !text.is_empty() => deltas.push(Delta::Text(text)),
                AnthropicContentBlock::Thinking { thinking } => {
                    let block = self.thinking.entry(index).or_default();
                    if !thinking.is_empty() {
                        block.thinking.push_str(&thinking);
                        deltas.push(Delta::Thinking(thinking));
                    }
                }
                AnthropicContentBlock::ToolUse { id, name } => self.tools.start(index, Some(id), Some(name)),
                _ => {}
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicBlockDelta::TextDelta { text } => deltas.push(Delta::Text(text)),
                AnthropicBlockDelta::ThinkingDelta { thinking } => {
                    self.thinking.entry(index).or_default().thinking.push_str(&thinking);
                    deltas.push(Delta::Thinking(thinking));
                }
                AnthropicBlockDelta::SignatureDelta { signature } => {
                    self.thinking.entry(index).or_default().signature.push_str(&signature)
                }
                AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                    self.tools.append_arguments(index, &partial_json)
                }
                AnthropicBlockDelta::Other => {}
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(output) = usage.output_tokens {
                    self.usage.output = output;
                }
                if let Some(input) = usage.input_tokens.filter(|n| *n > 0) {
                    self.usage.input = input
                        + usage.cache_creation_input_tokens.unwrap_or_default()
                        + usage.cache_read_input_tokens.unwrap_or_default();
                }
                self.stop_reason = delta.stop_reason.as_deref().map(|reason| match reason {
                    "max_tokens" => StopReason::MaxTokens,
                    "stop_sequence" => StopReason::StopSequence,
                    "tool_use" => StopReason::ToolCall,
                    _ => StopReason::Complete,
                });
            }
            AnthropicStreamEvent::MessageStop => self.done = true,
            AnthropicStreamEvent::Error { error } => {
                return Err(error_from_type(&error.kind, error.message));
            }
            AnthropicStreamEvent::ContentBlockStop { .. } | AnthropicStreamEvent::Ping => {}
            AnthropicStreamEvent::Unknown => warn!("Ignoring unknown Anthropic stream event"),
        }
        Ok(deltas)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn saw_terminal(&self) -> bool {
        self.done || self.stop_reason.is_some()
    }

    fn finish(self) -> std::result::Result<Completion, ModelError> {
        let blocks: Vec<ThinkingBlock> = self
            .thinking
            .into_values()
            .filter(|block| !block.signature.is_empty())
            .collect();
        // A lone signature also fits the flat thinking/signature pair
        let thinking_signature = match blocks.as_slice() {
            [only] => Some(only.signature.clone()),
            _ => None,
        };
        Ok(Completion {
            thinking_signature,
            thinking_blocks: blocks,
            tool_calls: self.tools.finish(self.stop_reason == Some(StopReason::MaxTokens))?,
            usage: self.usage,
            stop_reason: self.stop_reason,
        })
    }
}
