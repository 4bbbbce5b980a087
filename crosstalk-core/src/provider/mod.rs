//! Vendor adapters
//!
//! Every adapter turns the same vendor neutral request (context history plus
//! an [`AskInput`]) into one vendor's streaming wire protocol and folds the
//! stream back into an [`AssistantMessage`]. The flow shared by all of them
//! lives in [`run`]; the per vendor parts are a [`Codec`] and its
//! [`StreamDecoder`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Method, Request, Url};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::error::{ModelError, ModelErrorKind};
use crate::ledger::Ledger;
use crate::message::{AskInput, AskResponse, AskResult, AssistantMessage, Message, StopReason, ThinkingBlock, ToolCall};
use crate::model::Provider;
use crate::token::TokenUsage;
use crate::tool::ToolSpec;
use crate::transport::{SseEvent, Transport, TransportError};

pub mod anthropic;
pub mod google;
pub mod openai;

pub use anthropic::{AnthropicAdapter, AnthropicConfig, AnthropicOptions};
pub use google::{GoogleAdapter, GoogleConfig, GoogleOptions};
pub use openai::{OpenAIAdapter, OpenAIConfig, OpenAIOptions, ReasoningEffort};

/// Receives streamed text fragments as they arrive
pub type ChunkCallback<'a> = Box<dyn FnMut(&str) + Send + 'a>;

/// Per call options for [`Adapter::ask`]
///
/// `P` is the vendor specific tuning struct. Everything else is shared by
/// all vendors.
///
/// # Examples
///
/// ```
/// use crosstalk_core::{AnthropicOptions, AskOptions, Context};
///
/// let mut ctx = Context::new();
/// let mut streamed = String::new();
/// let options = AskOptions::new(AnthropicOptions { max_tokens: Some(256), ..Default::default() })
///     .with_context(&mut ctx)
///     .on_chunk(|text| streamed.push_str(text));
/// assert!(options.context.is_some());
/// ```
pub struct AskOptions<'a, P> {
    /// History to send, and where the exchange is appended on success
    pub context: Option<&'a mut Context>,
    pub on_chunk: Option<ChunkCallback<'a>>,
    pub on_thinking_chunk: Option<ChunkCallback<'a>>,
    /// Cancelling aborts the exchange and leaves the context untouched
    pub cancel: Option<CancellationToken>,
    pub provider: P,
}

impl<'a, P> AskOptions<'a, P> {
    pub fn new(provider: P) -> Self {
        Self {
            context: None,
            on_chunk: None,
            on_thinking_chunk: None,
            cancel: None,
            provider,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: &'a mut Context) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn on_chunk(mut self, callback: impl FnMut(&str) + Send + 'a) -> Self {
        self.on_chunk = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_thinking_chunk(mut self, callback: impl FnMut(&str) + Send + 'a) -> Self {
        self.on_thinking_chunk = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl<P: Default> Default for AskOptions<'_, P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<P: fmt::Debug> fmt::Debug for AskOptions<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AskOptions")
            .field("context", &self.context.as_ref().map(|c| c.messages().len()))
            .field("on_chunk", &self.on_chunk.is_some())
            .field("on_thinking_chunk", &self.on_thinking_chunk.is_some())
            .field("cancel", &self.cancel)
            .field("provider", &self.provider)
            .finish()
    }
}

/// One vendor, one model, one `ask`
///
/// `ask` never panics and never retries. Failures come back as a
/// [`ModelError`] with the context left exactly as it was; on success the
/// user input and the assistant reply are appended to the context (when one
/// was given) before returning.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Vendor specific tuning options
    type Options: Send + Default;

    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    async fn ask<'a>(&self, input: AskInput, options: AskOptions<'a, Self::Options>) -> AskResult;
}

/// Incremental output surfaced to the caller while streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delta {
    Text(String),
    Thinking(String),
}

/// Everything but the streamed text, known once the stream has ended
#[derive(Debug, Default)]
pub(crate) struct Completion {
    pub thinking_signature: Option<String>,
    pub thinking_blocks: Vec<ThinkingBlock>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub stop_reason: Option<StopReason>,
}

/// Folds one vendor's SSE events into deltas and a final [`Completion`]
pub(crate) trait StreamDecoder: Send {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<Delta>, ModelError>;

    /// The vendor signalled the end of the response
    fn is_done(&self) -> bool;

    /// Whether enough was seen to treat an ended stream as complete
    fn saw_terminal(&self) -> bool {
        self.is_done()
    }

    fn finish(self) -> Result<Completion, ModelError>;
}

/// What an adapter needs to encode one request
pub(crate) struct Exchange<'a, O> {
    pub model: &'a str,
    pub system: Option<&'a str>,
    pub history: &'a [Message],
    pub pending: &'a Message,
    pub tools: Vec<ToolSpec>,
    pub options: &'a O,
}

impl<O> Exchange<'_, O> {
    /// History followed by the new user message
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.history.iter().chain(std::iter::once(self.pending))
    }

    /// Name of the tool a previously issued call invoked
    pub fn tool_call_name(&self, tool_call_id: &str) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .filter_map(Message::as_assistant)
            .flat_map(|msg| msg.tool_calls.iter())
            .find(|call| call.id == tool_call_id)
            .map(|call| call.name.as_str())
    }
}

/// The vendor specific half of an adapter
pub(crate) trait Codec: Send + Sync {
    type Options: Send + Sync;
    type Decoder: StreamDecoder;

    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    fn transport(&self) -> &dyn Transport;

    fn ledger(&self) -> &Ledger;

    /// Rejects option combinations the model cannot serve, before any I/O
    fn check(&self, options: &Self::Options) -> Result<(), ModelError>;

    fn encode(&self, exchange: &Exchange<'_, Self::Options>) -> Result<Request, ModelError>;

    fn decoder(&self) -> Self::Decoder;

    /// Maps a non-success HTTP response onto the error taxonomy
    fn classify(&self, status: u16, retry_after: Option<Duration>, body: &str) -> ModelError;
}

/// Runs one exchange end to end
///
/// Sent → Streaming → Completed | ToolCallPending | Failed. The context is
/// only touched on the way to Completed / ToolCallPending.
pub(crate) async fn run<C: Codec>(codec: &C, input: AskInput, options: AskOptions<'_, C::Options>) -> AskResult {
    let span = info_span!("ask", provider = %codec.provider(), model = codec.model());
    exchange(codec, input, options).instrument(span).await
}

async fn exchange<C: Codec>(codec: &C, input: AskInput, options: AskOptions<'_, C::Options>) -> AskResult {
    let AskOptions {
        context,
        mut on_chunk,
        mut on_thinking_chunk,
        cancel,
        provider: vendor_options,
    } = options;
    let cancel = cancel.unwrap_or_default();

    codec.check(&vendor_options).inspect_err(|e| error!("Rejected before sending: {}", e))?;

    if input.content.is_none() && input.tool_results.is_empty() && input.attachments.is_empty() {
        return Err(ModelError::invalid_request("input has no content, tool results, or attachments"));
    }

    let history: &[Message] = context.as_deref().map(Context::messages).unwrap_or(&[]);
    for result in &input.tool_results {
        let known = context
            .as_deref()
            .is_some_and(|ctx| ctx.has_tool_call(&result.tool_call_id));
        if !known {
            error!(tool_call_id = %result.tool_call_id, "Tool result without a matching tool call");
            return Err(ModelError::invalid_request(format!(
                "tool result references unknown tool call '{}'",
                result.tool_call_id
            )));
        }
    }

    let pending = Message::User(input.into_message());
    let request = {
        let exchange = Exchange {
            model: codec.model(),
            system: context.as_deref().and_then(Context::system_message),
            history,
            pending: &pending,
            tools: context.as_deref().map(Context::tool_specs).unwrap_or_default(),
            options: &vendor_options,
        };
        codec.encode(&exchange)?
    };
    info!(
        history = history.len(),
        url = %request.url(),
        "Sending request"
    );

    let started = Instant::now();
    let transport_error = |e: TransportError| match e {
        TransportError::Status {
            status,
            retry_after,
            body,
        } => codec.classify(status, retry_after, &body),
        TransportError::Network(message) => ModelError::network(message),
        TransportError::Protocol(message) => ModelError::new(ModelErrorKind::Network, message, false),
    };

    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Cancelled before the response arrived");
            return Err(ModelError::cancelled());
        }
        sent = codec.transport().send(request) => sent,
    };
    let mut stream = sent.map_err(transport_error).inspect_err(|e| error!("Request failed: {}", e))?;

    let mut decoder = codec.decoder();
    let mut content = String::new();
    let mut thinking = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Cancelled while streaming");
                return Err(ModelError::cancelled());
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                let deltas = decoder.decode(&event).inspect_err(|e| error!("Stream reported an error: {}", e))?;
                for delta in deltas {
                    match delta {
                        Delta::Text(text) => {
                            if let Some(callback) = on_chunk.as_mut() {
                                callback(&text);
                            }
                            content.push_str(&text);
                        }
                        Delta::Thinking(text) => {
                            if let Some(callback) = on_thinking_chunk.as_mut() {
                                callback(&text);
                            }
                            thinking.push_str(&text);
                        }
                    }
                }
                if decoder.is_done() {
                    break;
                }
            }
            Some(Err(e)) => {
                let e = transport_error(e);
                error!("Stream failed: {}", e);
                return Err(e);
            }
            None => {
                if !decoder.saw_terminal() {
                    error!("Stream ended before the response was complete");
                    return Err(ModelError::network("stream ended before the response was complete"));
                }
                break;
            }
        }
    }
    drop(stream);

    let completion = decoder.finish()?;
    // A truncated turn stays truncated even if complete calls precede the cut
    let stop_reason = match completion.stop_reason {
        Some(StopReason::MaxTokens) => {
            warn!(tool_calls = completion.tool_calls.len(), "Response hit the token limit");
            StopReason::MaxTokens
        }
        _ if !completion.tool_calls.is_empty() => StopReason::ToolCall,
        reason => reason.unwrap_or(StopReason::Complete),
    };

    let message = AssistantMessage {
        content: (!content.is_empty()).then_some(content),
        tool_calls: completion.tool_calls,
        thinking: (!thinking.is_empty()).then_some(thinking),
        thinking_signature: completion.thinking_signature,
        thinking_blocks: completion.thinking_blocks,
        usage: completion.usage,
        provider: codec.provider(),
        model: codec.model().to_string(),
        took: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        timestamp: Utc::now(),
    };

    let ledger = context.as_deref().map(Context::ledger).unwrap_or(codec.ledger());
    let cost = ledger.cost(message.provider, &message.model, &message.usage);

    info!(
        ?stop_reason,
        input_tokens = message.usage.input,
        output_tokens = message.usage.output,
        tool_calls = message.tool_calls.len(),
        took_ms = message.took,
        "Exchange completed"
    );

    if let Some(ctx) = context {
        ctx.add_message(pending);
        ctx.add_message(Message::Assistant(message.clone()));
    }

    Ok(AskResponse {
        stop_reason,
        tokens: message.usage,
        message,
        cost,
    })
}

/// Builds a JSON POST for a vendor endpoint
pub(crate) fn json_post(url: &str, headers: &[(&'static str, &str)], body: &impl Serialize) -> Result<Request, ModelError> {
    let url = Url::parse(url).map_err(|e| ModelError::invalid_request(format!("invalid endpoint URL '{url}': {e}")))?;
    let mut request = Request::new(Method::POST, url);

    let map = request.headers_mut();
    map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    map.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    for (name, value) in headers {
        let value = HeaderValue::from_str(value).map_err(|_| {
            error!("Invalid value for header {}", name);
            ModelError::auth(format!("invalid value for header '{name}'"))
        })?;
        map.insert(HeaderName::from_static(name), value);
    }

    let bytes = serde_json::to_vec(body)
        .map_err(|e| ModelError::invalid_request(format!("failed to serialize request: {e}")))?;
    debug!("Payload serialized successfully ({} bytes)", bytes.len());
    *request.body_mut() = Some(bytes.into());
    Ok(request)
}

/// Parses one SSE data payload, reporting garbage as a retryable vendor error
pub(crate) fn parse_event<T: serde::de::DeserializeOwned>(data: &str) -> Result<T, ModelError> {
    serde_json::from_str(data).map_err(|e| {
        warn!("Unparseable stream event: {}", e);
        ModelError::api_error(format!("unparseable stream event: {e}"), true)
    })
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Collects tool calls that arrive in pieces
///
/// Calls are keyed by the vendor's block/call index. Argument fragments are
/// concatenated and parsed once the stream has finished. Missing or
/// repeated ids are replaced with fresh `call_` ids so every call in a turn
/// is addressable.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAssembler {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAssembler {
    /// Opens (or updates) the call at `index`
    pub fn start(&mut self, index: usize, id: Option<String>, name: Option<String>) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            call.id.get_or_insert(id);
        }
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            call.name = name;
        }
    }

    pub fn append_arguments(&mut self, index: usize, fragment: &str) {
        self.calls.entry(index).or_default().arguments.push_str(fragment);
    }

    /// Adds a call that arrived whole
    pub fn push_complete(&mut self, id: Option<String>, name: String, arguments: &Value) {
        let index = self.calls.keys().next_back().map_or(0, |last| last + 1);
        self.calls.insert(
            index,
            PartialCall {
                id: id.filter(|id| !id.is_empty()),
                name,
                arguments: arguments.to_string(),
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Parses every collected call
    ///
    /// With `truncated` set the response hit the token limit, so the last
    /// call may be cut off mid-arguments; it is dropped instead of failing
    /// the whole turn.
    pub fn finish(mut self, truncated: bool) -> Result<Vec<ToolCall>, ModelError> {
        if truncated {
            if let Some(entry) = self.calls.last_entry() {
                let call = entry.get();
                if parse_arguments(&call.name, &call.arguments).is_err() {
                    warn!(tool = %call.name, "Dropping tool call cut off by the token limit");
                    entry.remove();
                }
            }
        }

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.calls.len());
        for (_, call) in self.calls {
            let arguments = parse_arguments(&call.name, &call.arguments)?;
            let id = match call.id {
                Some(id) if seen.insert(id.clone()) => id,
                Some(id) => {
                    warn!(tool_call_id = %id, "Duplicate tool call id in one turn, replacing it");
                    fresh_call_id(&mut seen)
                }
                None => fresh_call_id(&mut seen),
            };
            out.push(ToolCall {
                id,
                name: call.name,
                arguments,
            });
        }
        Ok(out)
    }
}

fn fresh_call_id(seen: &mut HashSet<String>) -> String {
    let id = format!("call_{}", Uuid::new_v4().simple());
    seen.insert(id.clone());
    id
}

fn parse_arguments(name: &str, raw: &str) -> Result<Map<String, Value>, ModelError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(ModelError::api_error(
            format!("tool call '{name}' arguments are not an object: {other}"),
            true,
        )),
        Err(e) => {
            error!(tool = name, "Malformed tool call arguments: {}", raw);
            Err(ModelError::api_error(
                format!("tool call '{name}' has malformed arguments: {e}"),
                true,
            ))
        }
    }
}
