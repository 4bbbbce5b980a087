use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Request, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, trace, warn};

use super::{Adapter, AskOptions, Codec, Completion, Delta, Exchange, StreamDecoder, ToolCallAssembler, json_post, parse_event};
use crate::error::{ModelError, Result};
use crate::ledger::Ledger;
use crate::message::{AskInput, AskResult, Message, StopReason};
use crate::model::{Provider, supports_thinking};
use crate::secret::Secret;
use crate::token::TokenUsage;
use crate::tool::{ToolChoice, ToolSpec};
use crate::transport::{HttpTransport, SseEvent, Transport};

static RETRY_DELAY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)s\s*$").ok());

/// Configuration for the Google Gemini provider
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// API key for authentication
    pub api_key: Secret<String>,
    /// Base URL for the API
    pub base_url: String,
    /// Upper bound on one whole exchange
    pub request_timeout: Option<Duration>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::from_env("GEMINI_API_KEY"),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout: None,
        }
    }
}

/// Gemini specific tuning for one `ask`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoogleOptions {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub tool_choice: Option<ToolChoice>,
    /// Streams the model's thought summaries
    pub thinking_enabled: bool,
    pub thinking_budget: Option<u32>,
}

/// Adapter for the Gemini `streamGenerateContent` API
///
/// # Examples
///
/// ```
/// use crosstalk_core::{Adapter, GoogleAdapter, GoogleConfig, Provider};
///
/// let config = GoogleConfig { api_key: "your-api-key".into(), ..Default::default() };
/// let adapter = GoogleAdapter::with_config("gemini-2.5-flash", config).unwrap();
/// assert_eq!(adapter.provider(), Provider::Google);
/// ```
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    model: String,
    config: GoogleConfig,
    transport: Arc<dyn Transport>,
    ledger: Ledger,
}

impl GoogleAdapter {
    /// Creates a new GoogleAdapter with default configuration
    ///
    /// This method will use the GEMINI_API_KEY environment variable for authentication.
    #[instrument(skip_all, level = "debug")]
    pub fn new(model: impl Into<String>) -> Self {
        info!("Creating new GoogleAdapter with default configuration");
        let config = GoogleConfig::default();
        debug!("API key set: {}", !config.api_key.is_empty());
        Self::build(model.into(), config)
    }

    #[instrument(skip(config), level = "debug")]
    pub fn with_config(model: &str, config: GoogleConfig) -> Result<Self> {
        info!("Creating new GoogleAdapter with custom configuration");
        Url::parse(&config.base_url)?;
        debug!("API key set: {}", !config.api_key.is_empty());
        debug!("Base URL: {}", config.base_url);
        Ok(Self::build(model.to_string(), config))
    }

    fn build(model: String, config: GoogleConfig) -> Self {
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
impl Adapter for GoogleAdapter {
    type Options = GoogleOptions;

    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn ask<'a>(&self, input: AskInput, options: AskOptions<'a, GoogleOptions>) -> AskResult {
        super::run(self, input, options).await
    }
}

impl Codec for GoogleAdapter {
    type Options = GoogleOptions;
    type Decoder = GoogleDecoder;

    fn provider(&self) -> Provider {
        Provider::Google
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

    fn check(&self, options: &GoogleOptions) -> std::result::Result<(), ModelError> {
        if options.thinking_enabled && !supports_thinking(Provider::Google, &self.model) {
            return Err(ModelError::invalid_request(format!(
                "model '{}' does not support thinking",
                self.model
            )));
        }
        Ok(())
    }

    fn encode(&self, exchange: &Exchange<'_, GoogleOptions>) -> std::result::Result<Request, ModelError> {
        let payload = GoogleRequest::from_exchange(exchange);
        debug!(
            contents = payload.contents.len(),
            system_instruction = payload.system_instruction.is_some(),
            "Built Gemini payload"
        );
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url.trim_end_matches('/'),
            self.model
        );
        json_post(&url, &[("x-goog-api-key", self.config.api_key.expose())], &payload)
    }

    fn decoder(&self) -> GoogleDecoder {
        GoogleDecoder::default()
    }

    fn classify(&self, status: u16, retry_after: Option<Duration>, body: &str) -> ModelError {
        match parse_error_body(body) {
            Some(error) => {
                let retry_after = retry_after.or_else(|| error.retry_delay());
                ModelError::from_status(status, error.message, retry_after)
            }
            None => ModelError::from_status(status, body, retry_after),
        }
    }
}

/// Gemini sends error bodies either bare or wrapped in a one-element array
fn parse_error_body(body: &str) -> Option<GoogleError> {
    let value: Value = serde_json::from_str(body).ok()?;
    let envelope = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    serde_json::from_value::<GoogleErrorEnvelope>(envelope)
        .ok()
        .map(|e| e.error)
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    code: u16,
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<Value>,
}

impl GoogleError {
    fn retry_delay(&self) -> Option<Duration> {
        let regex = Option::as_ref(&RETRY_DELAY)?;
        self.details
            .iter()
            .filter(|detail| {
                detail
                    .get("@type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.ends_with("RetryInfo"))
            })
            .filter_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
            .find_map(|delay| regex.captures(delay))
            .and_then(|caps| caps[1].parse::<f64>().ok())
            .map(Duration::from_secs_f64)
    }

    fn into_model_error(self) -> ModelError {
        let retry_after = self.retry_delay();
        match self.status.as_deref() {
            Some("RESOURCE_EXHAUSTED") => ModelError::rate_limit(self.message, retry_after),
            Some("UNAUTHENTICATED" | "PERMISSION_DENIED") => ModelError::auth(self.message),
            Some("INVALID_ARGUMENT" | "NOT_FOUND" | "FAILED_PRECONDITION") => {
                ModelError::invalid_request(self.message)
            }
            Some("UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED") => ModelError::api_error(self.message, true),
            _ => ModelError::from_status(self.code, self.message, retry_after),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GooglePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<GoogleInlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GoogleFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GoogleFunctionResponse>,
}

impl GooglePart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleInlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GoogleFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GoogleFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GoogleContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleFunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl From<&ToolSpec> for GoogleFunctionDeclaration {
    fn from(spec: &ToolSpec) -> Self {
        GoogleFunctionDeclaration {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: function_parameters(&spec.json_schema),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleTool {
    pub function_declarations: Vec<GoogleFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleFunctionCallingConfig {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_function_names: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleToolConfig {
    pub function_calling_config: GoogleFunctionCallingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleThinkingConfig {
    pub include_thoughts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<GoogleThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleRequest {
    pub contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GoogleContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GoogleTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<GoogleToolConfig>,
    pub generation_config: GoogleGenerationConfig,
}

/// Rewrites a JSON Schema into the OpenAPI subset Gemini accepts
///
/// `"type": [t, "null"]` becomes `"type": t, "nullable": true` and local
/// `$ref`s are inlined, since Gemini has no definitions section. Returns
/// `None` when the tool takes no parameters.
fn function_parameters(schema: &Value) -> Option<Value> {
    let has_properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| !props.is_empty());
    if schema.get("type").is_none() || !has_properties {
        return None;
    }
    Some(openapi_schema(schema, schema, 0))
}

/// Recursive types are cut off at this many nested references
const MAX_REF_DEPTH: usize = 8;

fn openapi_schema(schema: &Value, root: &Value, depth: usize) -> Value {
    let Some(object) = schema.as_object() else {
        return schema.clone();
    };

    if let Some(target) = object.get("$ref").and_then(Value::as_str) {
        let resolved = target.strip_prefix('#').and_then(|pointer| root.pointer(pointer));
        let mut out = match resolved {
            Some(resolved) if depth < MAX_REF_DEPTH => openapi_schema(resolved, root, depth + 1),
            _ => {
                warn!(reference = target, "Cannot inline schema reference for Gemini");
                json!({"type": "object"})
            }
        };
        if let (Some(description), Some(map)) = (object.get("description"), out.as_object_mut()) {
            map.insert("description".into(), description.clone());
        }
        return out;
    }

    // Wrappers schemars emits around a single reference
    for combinator in ["allOf", "anyOf", "oneOf"] {
        let Some(branches) = object.get(combinator).and_then(Value::as_array) else {
            continue;
        };
        let mut non_null = branches.iter().filter(|b| b.get("type").and_then(Value::as_str) != Some("null"));
        if let (Some(only), None) = (non_null.next(), non_null.next()) {
            let mut out = openapi_schema(only, root, depth);
            if let Some(map) = out.as_object_mut() {
                if branches.len() > 1 {
                    map.insert("nullable".into(), Value::Bool(true));
                }
                if let Some(description) = object.get("description") {
                    map.insert("description".into(), description.clone());
                }
            }
            return out;
        }
    }

    let mut out = Map::new();
    for (key, value) in object {
        match key.as_str() {
            "type" => match value {
                Value::Array(types) => {
                    let mut non_null = types.iter().filter(|t| t.as_str() != Some("null"));
                    if let Some(t) = non_null.next() {
                        out.insert("type".into(), t.clone());
                    }
                    if types.len() > 1 {
                        out.insert("nullable".into(), Value::Bool(true));
                    }
                }
                other => {
                    out.insert("type".into(), other.clone());
                }
            },
            "properties" => {
                let props = value
                    .as_object()
                    .map(|props| {
                        props
                            .iter()
                            .map(|(k, v)| (k.clone(), openapi_schema(v, root, depth)))
                            .collect()
                    })
                    .unwrap_or_default();
                out.insert("properties".into(), Value::Object(props));
            }
            "items" => {
                out.insert("items".into(), openapi_schema(value, root, depth));
            }
            "anyOf" => {
                let branches = value
                    .as_array()
                    .map(|branches| branches.iter().map(|b| openapi_schema(b, root, depth)).collect())
                    .unwrap_or_default();
                out.insert("anyOf".into(), Value::Array(branches));
            }
            "required" | "description" | "enum" | "format" | "minimum" | "maximum" => {
                out.insert(key.clone(), value.clone());
            }
            _ => trace!(key = key.as_str(), "Dropping schema keyword Gemini does not accept"),
        }
    }
    Value::Object(out)
}

impl GoogleRequest {
    fn from_exchange(exchange: &Exchange<'_, GoogleOptions>) -> Self {
        let options = exchange.options;
        let contents = exchange
            .messages()
            .filter_map(|msg| to_google_content(msg, exchange))
            .collect();

        let declarations: Vec<GoogleFunctionDeclaration> =
            exchange.tools.iter().map(GoogleFunctionDeclaration::from).collect();
        let tool_config = if declarations.is_empty() {
            None
        } else {
            options.tool_choice.as_ref().map(|choice| {
                let (mode, allowed) = match choice {
                    ToolChoice::Auto => ("AUTO", Vec::new()),
                    ToolChoice::Any => ("ANY", Vec::new()),
                    ToolChoice::None => ("NONE", Vec::new()),
                    ToolChoice::Specific(name) => ("ANY", vec![name.clone()]),
                };
                GoogleToolConfig {
                    function_calling_config: GoogleFunctionCallingConfig {
                        mode,
                        allowed_function_names: allowed,
                    },
                }
            })
        };
        let tools = if declarations.is_empty() {
            Vec::new()
        } else {
            vec![GoogleTool {
                function_declarations: declarations,
            }]
        };

        GoogleRequest {
            contents,
            system_instruction: exchange.system.map(|system| GoogleContent {
                role: None,
                parts: vec![GooglePart::text(system.to_string())],
            }),
            tools,
            tool_config,
            generation_config: GoogleGenerationConfig {
                max_output_tokens: options.max_output_tokens,
                temperature: options.temperature,
                top_k: options.top_k,
                top_p: options.top_p,
                stop_sequences: options.stop_sequences.clone(),
                thinking_config: options.thinking_enabled.then(|| GoogleThinkingConfig {
                    include_thoughts: true,
                    thinking_budget: options.thinking_budget,
                }),
            },
        }
    }
}

fn to_google_content(msg: &Message, exchange: &Exchange<'_, GoogleOptions>) -> Option<GoogleContent> {
    let mut parts = Vec::new();
    let role = match msg {
        Message::User(user) => {
            parts.extend(user.tool_results.iter().map(|result| {
                let name = exchange
                    .tool_call_name(&result.tool_call_id)
                    .unwrap_or(&result.tool_call_id)
                    .to_string();
                let response = if result.is_error {
                    json!({ "error": result.content })
                } else {
                    json!({ "content": result.content })
                };
                GooglePart {
                    function_response: Some(GoogleFunctionResponse {
                        id: Some(result.tool_call_id.clone()),
                        name,
                        response,
                    }),
                    ..Default::default()
                }
            }));
            parts.extend(user.attachments.iter().map(|attachment| GooglePart {
                inline_data: Some(GoogleInlineData {
                    mime_type: attachment.mime_type.clone(),
                    data: attachment.data.clone(),
                }),
                ..Default::default()
            }));
            if let Some(text) = user.content.as_ref().filter(|t| !t.is_empty()) {
                parts.push(GooglePart::text(text.clone()));
            }
            "user"
        }
        Message::Assistant(assistant) => {
            if let Some(text) = assistant.content.as_ref().filter(|t| !t.is_empty()) {
                parts.push(GooglePart::text(text.clone()));
            }
            parts.extend(assistant.tool_calls.iter().map(|call| GooglePart {
                function_call: Some(GoogleFunctionCall {
                    id: Some(call.id.clone()),
                    name: call.name.clone(),
                    args: Value::Object(call.arguments.clone()),
                }),
                ..Default::default()
            }));
            // The signature rides on the first function call, or the text when there is none
            if assistant.provider == Provider::Google {
                if let Some(signature) = &assistant.thinking_signature {
                    let target = parts
                        .iter()
                        .position(|p| p.function_call.is_some())
                        .or_else(|| (!parts.is_empty()).then_some(0));
                    if let Some(part) = target.and_then(|i| parts.get_mut(i)) {
                        part.thought_signature = Some(signature.clone());
                    }
                }
            }
            "model"
        }
    };
    (!parts.is_empty()).then(|| GoogleContent {
        role: Some(role.to_string()),
        parts,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(default)]
    usage_metadata: Option<GoogleUsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<GooglePromptFeedback>,
    #[serde(default)]
    error: Option<GoogleError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
}

/// Maps a candidate `finishReason`
///
/// Content filters end the candidate early with whatever was generated so
/// far. That is not a usable answer, so those reasons fail the turn instead
/// of passing for a normal completion.
fn stop_reason(reason: &str) -> std::result::Result<StopReason, ModelError> {
    match reason {
        "STOP" => Ok(StopReason::Complete),
        "MAX_TOKENS" => Ok(StopReason::MaxTokens),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY" | "LANGUAGE"
        | "OTHER" => {
            warn!(finish_reason = reason, "Gemini blocked the response");
            Err(ModelError::api_error(format!("response blocked: {reason}"), false))
        }
        "MALFORMED_FUNCTION_CALL" => Err(ModelError::api_error("model produced a malformed function call", true)),
        other => {
            warn!(finish_reason = other, "Gemini stopped for an unrecognized reason");
            Ok(StopReason::Complete)
        }
    }
}

/// Folds `GenerateContentResponse` chunks
///
/// Gemini has no end-of-stream marker: the body simply ends, so a chunk
/// carrying a `finishReason` is what makes the response complete.
#[derive(Debug, Default)]
pub struct GoogleDecoder {
    tools: ToolCallAssembler,
    signature: Option<String>,
    usage: TokenUsage,
    finish_reason: Option<StopReason>,
}

impl StreamDecoder for GoogleDecoder {
    fn decode(&mut self, event: &SseEvent) -> std::result::Result<Vec<Delta>, ModelError> {
        let chunk: GoogleChunk = parse_event(&event.data)?;
        if let Some(error) = chunk.error {
            return Err(error.into_model_error());
        }
        if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ModelError::invalid_request(format!("prompt was blocked: {reason}")));
        }
        if let Some(usage) = chunk.usage_metadata {
            self.usage = TokenUsage::new(
                usage.prompt_token_count,
                usage.candidates_token_count + usage.thoughts_token_count,
            );
        }

        let mut deltas = Vec::new();
        for candidate in chunk.candidates {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(signature) = part.thought_signature {
                    self.signature.get_or_insert(signature);
                }
                if let Some(call) = part.function_call {
                    self.tools.push_complete(call.id, call.name, &call.args);
                } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    if part.thought == Some(true) {
                        deltas.push(Delta::Thinking(text));
                    } else {
                        deltas.push(Delta::Text(text));
                    }
                }
            }
            if let Some(reason) = candidate.finish_reason {
                trace!(finish_reason = reason.as_str(), "Gemini candidate finished");
                self.finish_reason = Some(stop_reason(&reason)?);
            }
        }
        Ok(deltas)
    }

    fn is_done(&self) -> bool {
        false
    }

    fn saw_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }

    fn finish(self) -> std::result::Result<Completion, ModelError> {
        Ok(Completion {
            thinking_signature: self.signature,
            thinking_blocks: Vec::new(),
            tool_calls: self.tools.finish(self.finish_reason == Some(StopReason::MaxTokens))?,
            usage: self.usage,
            stop_reason: self.finish_reason,
        })
    }
}
