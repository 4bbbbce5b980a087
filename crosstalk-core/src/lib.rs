// This is the main library file that re-exports the public API
// and defines the module structure.

pub mod context;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod message;
pub mod model;
pub mod provider;
pub mod schema;
pub mod secret;
pub mod token;
pub mod tool;
pub mod transport;

// Re-export the main types for convenient usage
pub use context::{Context, SerializedContext};
pub use error::{Error, ModelError, ModelErrorKind, Result, ToolError, ToolErrorKind};
pub use executor::ToolRegistry;
pub use ledger::{Ledger, ModelPricing, PriceTable, UsageSummary, UsageTotals};
pub use message::{
    AskInput, AskResponse, AskResult, AssistantMessage, Attachment, AttachmentKind, ExecuteToolResult, Message,
    StopReason, ThinkingBlock, ToolCall, ToolResult, UserMessage,
};
pub use model::{ModelCapabilities, Provider};
pub use provider::{
    Adapter, AnthropicAdapter, AnthropicConfig, AnthropicOptions, AskOptions, GoogleAdapter, GoogleConfig,
    GoogleOptions, OpenAIAdapter, OpenAIConfig, OpenAIOptions, ReasoningEffort,
};
pub use schema::{Schema, ValidationError, ValidationIssue};
pub use secret::Secret;
pub use token::TokenUsage;
#[cfg(feature = "schema")]
pub use tool::TypedTool;
pub use tool::{BoxError, InvalidArguments, ToolChoice, ToolDefinition, ToolSpec};
pub use tokio_util::sync::CancellationToken;
