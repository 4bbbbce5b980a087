use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModelError, ToolError};
use crate::model::Provider;
use crate::token::TokenUsage;

/// One entry of a conversation log
///
/// Serialized with a `role` tag so snapshots stay readable and vendor
/// neutral. Order in the log is significant; alternation between user and
/// assistant entries is not enforced.
///
/// # Examples
///
/// ```
/// use crosstalk_core::Message;
///
/// let msg = Message::user("What is 2 + 2?");
/// let json = serde_json::to_value(&msg).unwrap();
/// assert_eq!(json["role"], "user");
/// assert_eq!(json["content"], "What is 2 + 2?");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    /// Creates a plain text user message
    pub fn user(content: impl Into<String>) -> Self {
        Message::User(UserMessage::text(content))
    }

    pub fn as_user(&self) -> Option<&UserMessage> {
        match self {
            Message::User(msg) => Some(msg),
            Message::Assistant(_) => None,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(msg) => Some(msg),
            Message::User(_) => None,
        }
    }

    /// Returns the role tag used on the wire
    pub fn role(&self) -> &'static str {
        match self {
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::User(msg) => msg.timestamp,
            Message::Assistant(msg) => msg.timestamp,
        }
    }
}

impl From<UserMessage> for Message {
    fn from(msg: UserMessage) -> Self {
        Message::User(msg)
    }
}

impl From<AssistantMessage> for Message {
    fn from(msg: AssistantMessage) -> Self {
        Message::Assistant(msg)
    }
}

/// Input supplied by the caller: text, tool results, attachments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
}

impl UserMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_results: Vec::new(),
            attachments: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// One signed reasoning block
///
/// Anthropic requires each block to be replayed with its own signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub thinking: String,
    pub signature: String,
}

/// A completed model turn
///
/// `usage` is always present, even when the vendor omitted its usage block
/// (it is then zero). Cost is not stored here; the ledger derives it from
/// `provider`, `model`, and `usage` on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_signature: Option<String>,
    /// Per-block reasoning, present when the vendor signs blocks separately
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thinking_blocks: Vec<ThinkingBlock>,
    pub usage: TokenUsage,
    pub provider: Provider,
    pub model: String,
    /// Wall clock duration of the exchange in milliseconds
    pub took: u64,
    pub timestamp: DateTime<Utc>,
}

impl AssistantMessage {
    /// Creates an empty turn attributed to `provider` / `model`
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::{AssistantMessage, Provider, TokenUsage};
    ///
    /// let msg = AssistantMessage::new(Provider::Anthropic, "claude-3-5-haiku-20241022")
    ///     .with_content("Hello!")
    ///     .with_usage(TokenUsage::new(12, 3));
    /// assert_eq!(msg.content.as_deref(), Some("Hello!"));
    /// assert_eq!(msg.usage.output, 3);
    /// ```
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            content: None,
            tool_calls: Vec::new(),
            thinking: None,
            thinking_signature: None,
            thinking_blocks: Vec::new(),
            usage: TokenUsage::default(),
            provider,
            model: model.into(),
            took: 0,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
}

/// Binary payload sent alongside user text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// Base64 encoded payload
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    /// Creates an image attachment from already encoded base64 text
    pub fn image_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            data: data.into(),
            mime_type: mime_type.into(),
            name: None,
        }
    }

    /// Creates an image attachment from raw bytes
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::Attachment;
    ///
    /// let img = Attachment::image_bytes(b"\x89PNG", "image/png");
    /// assert_eq!(img.data, "iVBORw==");
    /// ```
    pub fn image_bytes(bytes: impl AsRef<[u8]>, mime_type: impl Into<String>) -> Self {
        Self::image_base64(STANDARD.encode(bytes), mime_type)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Renders the payload as a `data:` URL
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within its owning assistant message
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The answer to a previously issued [`ToolCall`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::success(tool_call_id, content)
        }
    }
}

/// Outcome of running one tool call through the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteToolResult {
    Success {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        result: Value,
    },
    Failure {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        error: ToolError,
    },
}

impl ExecuteToolResult {
    pub fn tool_call_id(&self) -> &str {
        match self {
            ExecuteToolResult::Success { tool_call_id, .. }
            | ExecuteToolResult::Failure { tool_call_id, .. } => tool_call_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecuteToolResult::Success { .. })
    }
}

/// Feeds an execution outcome back to the model
///
/// String results are passed through as is, other JSON values are rendered
/// compactly, and failures become error results carrying the tool's message.
impl From<ExecuteToolResult> for ToolResult {
    fn from(outcome: ExecuteToolResult) -> Self {
        match outcome {
            ExecuteToolResult::Success {
                tool_call_id,
                result: Value::String(text),
            } => ToolResult::success(tool_call_id, text),
            ExecuteToolResult::Success {
                tool_call_id,
                result,
            } => ToolResult::success(tool_call_id, result.to_string()),
            ExecuteToolResult::Failure {
                tool_call_id,
                error,
            } => ToolResult::error(tool_call_id, error.message),
        }
    }
}

/// What the caller sends in one `ask()`
///
/// # Examples
///
/// ```
/// use crosstalk_core::{AskInput, ToolResult};
///
/// let input: AskInput = "hello".into();
/// assert_eq!(input.content.as_deref(), Some("hello"));
///
/// let input = AskInput::default().with_tool_results(vec![ToolResult::success("call_1", "4")]);
/// assert!(input.content.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AskInput {
    pub content: Option<String>,
    pub tool_results: Vec<ToolResult>,
    pub attachments: Vec<Attachment>,
}

impl AskInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_tool_results(mut self, tool_results: Vec<ToolResult>) -> Self {
        self.tool_results = tool_results;
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Stamps the input as the user message that will enter the log
    pub fn into_message(self) -> UserMessage {
        UserMessage {
            content: self.content,
            tool_results: self.tool_results,
            attachments: self.attachments,
            timestamp: Utc::now(),
        }
    }
}

impl From<&str> for AskInput {
    fn from(content: &str) -> Self {
        AskInput::text(content)
    }
}

impl From<String> for AskInput {
    fn from(content: String) -> Self {
        AskInput::text(content)
    }
}

impl From<Vec<ToolResult>> for AskInput {
    fn from(tool_results: Vec<ToolResult>) -> Self {
        AskInput::default().with_tool_results(tool_results)
    }
}

/// Why the model stopped producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxTokens,
    StopSequence,
    ToolCall,
    Complete,
}

/// A successful exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub stop_reason: StopReason,
    pub message: AssistantMessage,
    pub tokens: TokenUsage,
    /// USD, derived from `tokens` through the adapter's ledger
    pub cost: f64,
}

pub type AskResult = std::result::Result<AskResponse, ModelError>;
