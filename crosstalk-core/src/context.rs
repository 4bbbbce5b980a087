use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::error::{Error, Result};
use crate::executor::ToolRegistry;
use crate::ledger::{Ledger, UsageTotals};
use crate::message::{ExecuteToolResult, Message, ToolCall};
use crate::model::Provider;
use crate::schema::canonicalize;
use crate::token::TokenUsage;
use crate::tool::{ToolDefinition, ToolSpec};

/// The conversation state an adapter reads from and appends to
///
/// A context owns the system message, the ordered message log, the tool
/// registry, and the ledger used to price its usage. Cloning yields a fully
/// independent copy (tool bodies are shared, they are immutable), which is
/// how a conversation is branched.
///
/// # Examples
///
/// ```
/// use crosstalk_core::{AssistantMessage, Context, Message, Provider, TokenUsage};
///
/// let mut ctx = Context::new();
/// ctx.set_system_message("You are terse.");
/// ctx.add_message(Message::user("hi"));
/// ctx.add_message(
///     AssistantMessage::new(Provider::Anthropic, "claude-3-5-sonnet-20241022")
///         .with_content("hello")
///         .with_usage(TokenUsage::new(0, 1000))
///         .into(),
/// );
///
/// assert_eq!(ctx.messages().len(), 2);
/// assert_eq!(ctx.token_usage(), TokenUsage::new(0, 1000));
/// assert!((ctx.total_cost() - 0.015).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    system_message: Option<String>,
    messages: Vec<Message>,
    tools: ToolRegistry,
    ledger: Ledger,
}

/// A persisted conversation, minus executable tool bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prices this context's usage with `ledger` instead of the builtin table
    #[must_use]
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Sets system message and returns self for method chaining
    #[must_use]
    pub fn with_system_message(mut self, text: impl Into<String>) -> Self {
        self.set_system_message(text);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn set_system_message(&mut self, text: impl Into<String>) {
        self.system_message = Some(text.into());
    }

    pub fn system_message(&self) -> Option<&str> {
        self.system_message.as_deref()
    }

    /// Appends a message; role alternation is not checked
    pub fn add_message(&mut self, message: Message) {
        debug!(role = message.role(), position = self.messages.len(), "Appending message");
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Empties the message log
    ///
    /// The system message and registered tools are kept. Usage and cost
    /// views are derived from the log, so they read zero afterwards.
    pub fn clear(&mut self) {
        info!(dropped = self.messages.len(), "Clearing context");
        self.messages.clear();
    }

    /// Whether the log holds an assistant tool call with this id
    pub fn has_tool_call(&self, tool_call_id: &str) -> bool {
        self.find_tool_call(tool_call_id).is_some()
    }

    /// Finds a previously issued tool call by id, most recent first
    pub fn find_tool_call(&self, tool_call_id: &str) -> Option<&ToolCall> {
        self.messages
            .iter()
            .rev()
            .filter_map(Message::as_assistant)
            .flat_map(|msg| msg.tool_calls.iter())
            .find(|call| call.id == tool_call_id)
    }

    /// Totals over every assistant message, priced with this context's ledger
    pub fn usage(&self) -> UsageTotals {
        let mut totals = UsageTotals::default();
        for msg in self.messages.iter().filter_map(Message::as_assistant) {
            let cost = self.ledger.cost(msg.provider, &msg.model, &msg.usage);
            totals.record(msg.provider, &msg.model, msg.usage, cost);
        }
        totals
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.messages
            .iter()
            .filter_map(Message::as_assistant)
            .map(|msg| msg.usage)
            .sum()
    }

    pub fn tokens_by_provider(&self) -> BTreeMap<Provider, TokenUsage> {
        self.usage()
            .by_provider
            .into_iter()
            .map(|(provider, summary)| (provider, summary.tokens))
            .collect()
    }

    pub fn tokens_by_model(&self) -> BTreeMap<String, TokenUsage> {
        self.usage()
            .by_model
            .into_iter()
            .map(|(model, summary)| (model, summary.tokens))
            .collect()
    }

    /// Total USD cost; models missing from the price table count as free
    pub fn total_cost(&self) -> f64 {
        self.usage().total.cost
    }

    pub fn cost_by_provider(&self) -> BTreeMap<Provider, f64> {
        self.usage()
            .by_provider
            .into_iter()
            .map(|(provider, summary)| (provider, summary.cost))
            .collect()
    }

    pub fn cost_by_model(&self) -> BTreeMap<String, f64> {
        self.usage()
            .by_model
            .into_iter()
            .map(|(model, summary)| (model, summary.cost))
            .collect()
    }

    /// Registers a tool under its unique name
    pub fn add_tool(&mut self, tool: ToolDefinition) -> Result<()> {
        self.tools.add(tool)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn list_tools(&self) -> &[ToolDefinition] {
        self.tools.list()
    }

    /// Name, description and canonical schema of each tool, in registration order
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools.specs()
    }

    pub async fn execute_tool(&self, call: &ToolCall) -> ExecuteToolResult {
        self.tools.execute(call, CancellationToken::new()).await
    }

    pub async fn execute_tool_with_cancel(&self, call: &ToolCall, cancel: CancellationToken) -> ExecuteToolResult {
        self.tools.execute(call, cancel).await
    }

    /// Runs tool calls concurrently, returning results in call order
    pub async fn execute_tools(&self, calls: &[ToolCall]) -> Vec<ExecuteToolResult> {
        self.tools.execute_all(calls, &CancellationToken::new()).await
    }

    pub async fn execute_tools_with_cancel(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ExecuteToolResult> {
        self.tools.execute_all(calls, cancel).await
    }

    /// Takes a snapshot of the conversation
    ///
    /// Messages are copied verbatim. Tools are reduced to their specs; the
    /// executable bodies have to be supplied again on [`Context::deserialize`].
    pub fn serialize(&self) -> SerializedContext {
        SerializedContext {
            system_message: self.system_message.clone(),
            messages: self.messages.clone(),
            tools: self.tool_specs(),
        }
    }

    /// Rebuilds a context from a snapshot and the application's tool definitions
    ///
    /// Every serialized tool must be matched by a definition of the same name
    /// whose canonical schema is identical; otherwise the snapshot belongs to
    /// a different version of the application and restoring it is refused.
    /// Definitions that the snapshot does not mention are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::{Context, Error, Schema, ToolDefinition};
    /// use serde_json::Value;
    ///
    /// let echo = ToolDefinition::new("echo", "Echo", Schema::any(), |v: Value, _| async move { Ok(v) });
    /// let mut ctx = Context::new();
    /// ctx.add_tool(echo.clone()).unwrap();
    /// let snapshot = ctx.serialize();
    ///
    /// assert!(Context::deserialize(snapshot.clone(), &[echo]).is_ok());
    /// assert!(matches!(
    ///     Context::deserialize(snapshot, &[]),
    ///     Err(Error::MissingTool(name)) if name == "echo"
    /// ));
    /// ```
    #[instrument(skip_all, fields(messages = snapshot.messages.len(), tools = snapshot.tools.len()), level = "debug")]
    pub fn deserialize(snapshot: SerializedContext, available: &[ToolDefinition]) -> Result<Context> {
        let by_name: HashMap<&str, &ToolDefinition> =
            available.iter().map(|def| (def.name.as_str(), def)).collect();

        let mut tools = ToolRegistry::new();
        for spec in &snapshot.tools {
            let def = by_name.get(spec.name.as_str()).ok_or_else(|| {
                error!(tool = %spec.name, "Snapshot references a tool that was not provided");
                Error::MissingTool(spec.name.clone())
            })?;
            let expected = canonicalize(&spec.json_schema);
            let found = def.schema.canonical();
            if found != expected {
                error!(tool = %spec.name, "Tool schema changed since the snapshot was taken");
                return Err(Error::SchemaMismatch {
                    tool: spec.name.clone(),
                    expected,
                    found,
                });
            }
            tools.add((*def).clone())?;
        }

        info!("Restored context from snapshot");
        Ok(Context {
            system_message: snapshot.system_message,
            messages: snapshot.messages,
            tools,
            ledger: Ledger::default(),
        })
    }

    /// Parses a snapshot from JSON text and restores it
    pub fn from_json(json: &str, available: &[ToolDefinition]) -> Result<Context> {
        let snapshot: SerializedContext = serde_json::from_str(json)?;
        Self::deserialize(snapshot, available)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.serialize())?)
    }
}
