use std::any::Any;
use std::collections::HashMap;

use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result, ToolError};
use crate::message::{ExecuteToolResult, ToolCall};
use crate::tool::{InvalidArguments, ToolDefinition, ToolSpec};

/// Named tools in registration order
///
/// Lookup is by name; iteration (and therefore the order tools are
/// advertised to vendors) follows registration.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; a second tool with the same name is rejected
    pub fn add(&mut self, tool: ToolDefinition) -> Result<()> {
        if self.index.contains_key(&tool.name) {
            error!(tool = %tool.name, "Tool registered twice");
            return Err(Error::DuplicateTool(tool.name));
        }
        debug!(tool = %tool.name, "Registering tool");
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(ToolSpec::from).collect()
    }

    /// Looks up, validates, and runs one tool call
    ///
    /// Every outcome is captured in the returned [`ExecuteToolResult`]:
    /// an unknown tool, arguments that fail validation, or an
    /// [`InvalidArguments`] error from the body yield `invalid_args`. Any
    /// other error returned by the body, or a panic inside it, yields
    /// `execution_failed`.
    #[instrument(skip(self, call, cancel), fields(tool = %call.name, call_id = %call.id), level = "debug")]
    pub async fn execute(&self, call: &ToolCall, cancel: CancellationToken) -> ExecuteToolResult {
        let failure = |error: ToolError| ExecuteToolResult::Failure {
            tool_call_id: call.id.clone(),
            error,
        };

        let Some(tool) = self.get(&call.name) else {
            warn!("Model called an unregistered tool");
            return failure(ToolError::invalid_args(
                &call.name,
                format!("Tool not found: {}", call.name),
            ));
        };

        let args = Value::Object(call.arguments.clone());
        if let Err(e) = tool.schema.validate(&args) {
            warn!(error = %e, "Tool arguments failed validation");
            return failure(ToolError::invalid_args(&call.name, e.to_string()));
        }

        // Spawned so a panicking body surfaces as a JoinError instead of
        // unwinding through the caller.
        match tokio::spawn(tool.invoke(args, cancel)).await {
            Ok(Ok(result)) => {
                debug!("Tool call succeeded");
                ExecuteToolResult::Success {
                    tool_call_id: call.id.clone(),
                    result,
                }
            }
            Ok(Err(e)) if e.is::<InvalidArguments>() => {
                warn!(error = %e, "Tool rejected its arguments");
                failure(ToolError::invalid_args(&call.name, e.to_string()))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Tool call failed");
                failure(ToolError::execution_failed(&call.name, e.to_string()))
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "tool task was cancelled".to_string()
                };
                error!(%message, "Tool call panicked");
                failure(ToolError::execution_failed(&call.name, message))
            }
        }
    }

    /// Runs several tool calls concurrently
    ///
    /// Results come back in the order of `calls`, regardless of completion
    /// order. Each call receives a child of `cancel`, so cancelling the
    /// parent stops all of them while a single child can be cancelled alone.
    #[instrument(skip_all, fields(calls = calls.len()), level = "debug")]
    pub async fn execute_all(&self, calls: &[ToolCall], cancel: &CancellationToken) -> Vec<ExecuteToolResult> {
        info!("Executing {} tool calls", calls.len());
        join_all(
            calls
                .iter()
                .map(|call| self.execute(call, cancel.child_token())),
        )
        .await
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::schema::Schema;
    use crate::tool::BoxError;
    use serde_json::{Map, json};

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        let arguments = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolCall::new(id, name, arguments)
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .add(ToolDefinition::new(
                "double",
                "Doubles n",
                Schema::object().required_property("n", Schema::integer()),
                |args: Value, _: CancellationToken| async move {
                    Ok(json!(args["n"].as_i64().unwrap_or_default() * 2))
                },
            ))
            .unwrap();
        registry
            .add(ToolDefinition::new(
                "fail",
                "Always fails",
                Schema::any(),
                |_: Value, _: CancellationToken| async move {
                    Err::<Value, BoxError>("disk on fire".into())
                },
            ))
            .unwrap();
        registry
            .add(ToolDefinition::new(
                "explode",
                "Panics",
                Schema::any(),
                |_: Value, _: CancellationToken| async move {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(Value::Null)
                },
            ))
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = registry();
        let again = ToolDefinition::new("double", "dup", Schema::any(), |a: Value, _: CancellationToken| async move {
            Ok(a)
        });
        let err = registry.add(again).unwrap_err();
        assert!(matches!(err, Error::DuplicateTool(name) if name == "double"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_registration_order_is_kept() {
        let names: Vec<_> = registry().list().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, ["double", "fail", "explode"]);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let outcome = registry()
            .execute(&call("c1", "double", json!({"n": 21})), CancellationToken::new())
            .await;
        assert_eq!(
            outcome,
            ExecuteToolResult::Success {
                tool_call_id: "c1".into(),
                result: json!(42)
            }
        );
    }

    #[tokio::test]
    async fn test_execute_failures_are_classified() {
        let registry = registry();
        let token = CancellationToken::new();

        let cases = [
            (call("a", "missing", json!({})), ToolErrorKind::InvalidArgs),
            (call("b", "double", json!({"n": "x"})), ToolErrorKind::InvalidArgs),
            (call("c", "fail", json!({})), ToolErrorKind::ExecutionFailed),
            (call("d", "explode", json!({})), ToolErrorKind::ExecutionFailed),
        ];
        for (tool_call, kind) in cases {
            match registry.execute(&tool_call, token.clone()).await {
                ExecuteToolResult::Failure { tool_call_id, error } => {
                    assert_eq!(tool_call_id, tool_call.id);
                    assert_eq!(error.kind, kind, "{}", tool_call.name);
                    assert_eq!(error.tool_name, tool_call.name);
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_body_rejecting_arguments_is_invalid_args() {
        let mut registry = ToolRegistry::new();
        registry
            .add(ToolDefinition::new(
                "picky",
                "Rejects everything",
                Schema::any(),
                |_: Value, _: CancellationToken| async move {
                    Err::<Value, BoxError>(InvalidArguments("days: out of range".into()).into())
                },
            ))
            .unwrap();
        let ExecuteToolResult::Failure { error, .. } = registry
            .execute(&call("x", "picky", json!({})), CancellationToken::new())
            .await
        else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ToolErrorKind::InvalidArgs);
        assert_eq!(error.message, "days: out of range");
    }

    #[tokio::test]
    async fn test_panic_message_is_captured() {
        let outcome = registry()
            .execute(&call("p", "explode", json!({})), CancellationToken::new())
            .await;
        let ExecuteToolResult::Failure { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.message, "kaboom");
    }

    #[tokio::test]
    async fn test_execute_all_isolates_failures() {
        let calls = [
            call("1", "fail", json!({})),
            call("2", "double", json!({"n": 2})),
        ];
        let results = registry().execute_all(&calls, &CancellationToken::new()).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].is_success());
        assert!(results[1].is_success());
        assert_eq!(results[1].tool_call_id(), "2");
    }
}
