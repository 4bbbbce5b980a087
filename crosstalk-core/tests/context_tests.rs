use std::time::{Duration, Instant};

use crosstalk_core::{
    AssistantMessage, CancellationToken, Context, Error, ExecuteToolResult, Message, Provider, Schema, TokenUsage,
    ToolCall, ToolDefinition, ToolErrorKind, ToolResult,
};
use parameterized::parameterized;
use serde_json::{Map, Value, json};
use test_tools::{
    CalculatorTool, ForecastTool, calculator_definition, calculator_schema, failing_tool, slow_echo, wait_for_cancel,
};
use tracing::{Level, info};

mod test_utils;

use test_utils::setup_tracing;

fn assistant(provider: Provider, model: &str, usage: TokenUsage) -> Message {
    AssistantMessage::new(provider, model)
        .with_content("ok")
        .with_usage(usage)
        .into()
}

fn call(id: &str, name: &str, args: Value) -> ToolCall {
    let arguments: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
    ToolCall::new(id, name, arguments)
}

#[test]
fn test_empty_context_has_no_messages_or_cost() {
    let ctx = Context::new();
    assert_eq!(ctx.messages().len(), 0);
    assert_eq!(ctx.total_cost(), 0.0);
    assert!(ctx.last_message().is_none());
    assert!(ctx.cost_by_provider().is_empty());
}

#[parameterized(
    model = { "claude-3-5-sonnet-20241022", "claude-3-5-haiku-20241022" },
    expected = { 0.015, 0.004 }
)]
fn test_cost_by_provider_for_output_tokens(model: &str, expected: f64) {
    let mut ctx = Context::new();
    ctx.add_message(assistant(Provider::Anthropic, model, TokenUsage::new(0, 1000)));

    let by_provider = ctx.cost_by_provider();
    assert!((by_provider[&Provider::Anthropic] - expected).abs() < 1e-9);
    assert!((ctx.cost_by_model()[model] - expected).abs() < 1e-9);
}

#[test]
fn test_unrecognized_model_contributes_zero() {
    let mut ctx = Context::new();
    ctx.add_message(assistant(Provider::OpenAI, "my-private-finetune", TokenUsage::new(500, 500)));
    ctx.add_message(assistant(Provider::Anthropic, "claude-3-5-haiku-20241022", TokenUsage::new(0, 1000)));

    assert!((ctx.total_cost() - 0.004).abs() < 1e-9);
    assert_eq!(ctx.cost_by_model()["my-private-finetune"], 0.0);
    // Tokens are still counted
    assert_eq!(ctx.token_usage(), TokenUsage::new(500, 1500));
}

#[test]
fn test_last_message_after_add() {
    let mut ctx = Context::new();
    for text in ["one", "two", "three"] {
        let msg = Message::user(text);
        ctx.add_message(msg.clone());
        assert_eq!(ctx.last_message(), Some(&msg));
    }
}

#[test]
fn test_token_usage_is_sum_over_assistant_messages() {
    let mut ctx = Context::new();
    let usages = [TokenUsage::new(10, 20), TokenUsage::new(3, 4), TokenUsage::new(100, 0)];
    for usage in usages {
        ctx.add_message(Message::user("q"));
        ctx.add_message(assistant(Provider::Google, "gemini-2.5-flash", usage));
    }
    let expected: TokenUsage = usages.iter().sum();
    assert_eq!(ctx.token_usage(), expected);
    assert_eq!(ctx.tokens_by_provider()[&Provider::Google], expected);
    assert_eq!(ctx.tokens_by_model()["gemini-2.5-flash"], TokenUsage::new(113, 24));
}

#[test]
fn test_clone_is_independent() {
    let mut original = Context::new().with_system_message("original");
    original.add_message(Message::user("shared"));

    let mut branch = original.clone();
    branch.add_message(Message::user("only in branch"));
    branch.set_system_message("branched");
    branch.add_tool(calculator_definition(calculator_schema())).unwrap();

    original.add_message(Message::user("only in original"));

    assert_eq!(original.messages().len(), 2);
    assert_eq!(branch.messages().len(), 2);
    assert_eq!(original.system_message(), Some("original"));
    assert_eq!(branch.system_message(), Some("branched"));
    assert!(original.list_tools().is_empty());
    let last_text = original
        .last_message()
        .and_then(Message::as_user)
        .and_then(|user| user.content.as_deref());
    assert_eq!(last_text, Some("only in original"));
}

#[test]
fn test_round_trip_without_tools() {
    setup_tracing(Level::DEBUG);

    let mut ctx = Context::new().with_system_message("You are a helpful assistant.");
    ctx.add_message(Message::user("What's 2+2?"));
    ctx.add_message(assistant(Provider::OpenAI, "gpt-4o", TokenUsage::new(12, 3)));

    let json = ctx.to_json().unwrap();
    info!("Serialized context: {}", json);
    let restored = Context::from_json(&json, &[]).unwrap();

    assert_eq!(restored.system_message(), ctx.system_message());
    assert_eq!(restored.messages(), ctx.messages());
    assert_eq!(restored.serialize(), ctx.serialize());
    assert_eq!(restored.total_cost(), ctx.total_cost());
}

#[test]
fn test_deserialize_with_matching_tool() {
    let calculator = ToolDefinition::typed(CalculatorTool).unwrap();
    let mut ctx = Context::new();
    ctx.add_tool(calculator.clone()).unwrap();
    let snapshot = ctx.serialize();
    assert_eq!(snapshot.tools[0].name, "calculator");

    let restored = Context::deserialize(snapshot.clone(), &[calculator]).unwrap();
    assert_eq!(restored.list_tools().len(), 1);
    assert_eq!(restored.list_tools()[0].name, "calculator");

    let err = Context::deserialize(snapshot, &[]).unwrap_err();
    assert!(matches!(&err, Error::MissingTool(name) if name == "calculator"));
    assert!(err.to_string().contains("calculator"));
}

#[test]
fn test_deserialize_rejects_changed_schema() {
    let mut ctx = Context::new();
    ctx.add_tool(calculator_definition(calculator_schema())).unwrap();
    let snapshot = ctx.serialize();

    // Same name and description, different field name
    let renamed = calculator_definition(Schema::object().required_property("expr", Schema::string()));
    let err = Context::deserialize(snapshot.clone(), &[renamed]).unwrap_err();
    match err {
        Error::SchemaMismatch { tool, expected, found } => {
            assert_eq!(tool, "calculator");
            assert!(expected["properties"].get("expression").is_some());
            assert!(found["properties"].get("expr").is_some());
        }
        other => panic!("Expected a schema mismatch, got {other:?}"),
    }

    // Unmentioned extra definitions are fine
    let restored = Context::deserialize(
        snapshot,
        &[calculator_definition(calculator_schema()), failing_tool("unused", "never")],
    )
    .unwrap();
    assert_eq!(restored.list_tools().len(), 1);
}

fn ledger_tool(schema: Value) -> ToolDefinition {
    ToolDefinition::new(
        "ledger",
        "Applies operations to named counters",
        Schema::from_json_schema(schema).unwrap(),
        |args: Value, _: CancellationToken| async move { Ok::<Value, crosstalk_core::BoxError>(args) },
    )
}

#[test]
fn test_deserialize_detects_nested_schema_changes() {
    let original = json!({
        "type": "object",
        "properties": {
            "counts": {"type": "object", "additionalProperties": {"type": "integer"}},
            "op": {"oneOf": [
                {"type": "object", "required": ["add"], "properties": {"add": {"type": "integer"}}},
                {"type": "object", "required": ["reset"], "properties": {"reset": {"type": "boolean"}}}
            ]}
        }
    });
    let mut ctx = Context::new();
    ctx.add_tool(ledger_tool(original.clone())).unwrap();
    let snapshot = ctx.serialize();

    let mut loosened = original.clone();
    loosened["properties"]["counts"]["additionalProperties"] = json!({"type": "string"});
    let err = Context::deserialize(snapshot.clone(), &[ledger_tool(loosened)]).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { ref tool, .. } if tool == "ledger"));

    let mut reshaped = original.clone();
    reshaped["properties"]["op"]["oneOf"] = json!([{"type": "string"}, {"type": "boolean"}]);
    let err = Context::deserialize(snapshot.clone(), &[ledger_tool(reshaped)]).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));

    assert!(Context::deserialize(snapshot, &[ledger_tool(original)]).is_ok());
}

#[tokio::test]
async fn test_typed_arguments_outside_the_schema_never_reach_the_tool() {
    let forecast = ForecastTool::default();
    let mut ctx = Context::new();
    ctx.add_tool(ToolDefinition::typed(forecast.clone()).unwrap()).unwrap();

    let results = ctx
        .execute_tools(&[
            call("negative", "forecast", json!({"city": "Oslo", "days": -3})),
            call("too_big", "forecast", json!({"city": "Oslo", "days": 300})),
        ])
        .await;
    for result in &results {
        match result {
            ExecuteToolResult::Failure { error, .. } => assert_eq!(error.kind, ToolErrorKind::InvalidArgs),
            other => panic!("Expected invalid_args, got {other:?}"),
        }
    }
    assert_eq!(forecast.runs(), 0);

    let ok = ctx
        .execute_tool(&call("fine", "forecast", json!({"city": "Oslo", "days": 3})))
        .await;
    assert!(ok.is_success());
    assert_eq!(forecast.runs(), 1);
}

#[tokio::test]
async fn test_execute_tools_with_cancel_stops_waiting_calls() {
    let mut ctx = Context::new();
    ctx.add_tool(wait_for_cancel("waiter")).unwrap();
    ctx.add_tool(slow_echo("fast", Duration::from_millis(1))).unwrap();

    let calls = [
        call("c1", "waiter", json!({})),
        call("c2", "fast", json!({"n": 2})),
        call("c3", "waiter", json!({})),
    ];
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let results = tokio::time::timeout(Duration::from_secs(5), ctx.execute_tools_with_cancel(&calls, &cancel))
        .await
        .expect("cancelling the parent token ends every waiting call");
    assert!(started.elapsed() < Duration::from_secs(5));

    let ids: Vec<_> = results.iter().map(ExecuteToolResult::tool_call_id).collect();
    assert_eq!(ids, ["c1", "c2", "c3"]);
    assert_eq!(
        results[1],
        ExecuteToolResult::Success {
            tool_call_id: "c2".into(),
            result: json!({"n": 2})
        }
    );
    for i in [0, 2] {
        match &results[i] {
            ExecuteToolResult::Failure { error, .. } => {
                assert_eq!(error.kind, ToolErrorKind::ExecutionFailed);
                assert!(error.message.contains("cancelled"));
            }
            other => panic!("Expected a cancelled call, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_cancelling_one_call_leaves_siblings_running() {
    let mut ctx = Context::new();
    ctx.add_tool(wait_for_cancel("waiter")).unwrap();
    ctx.add_tool(slow_echo("slow", Duration::from_millis(30))).unwrap();

    let parent = CancellationToken::new();
    let child = parent.child_token();
    child.cancel();

    let waiter = call("w", "waiter", json!({}));
    let slow = call("s", "slow", json!({"ok": true}));
    let (cancelled, finished) = tokio::join!(
        ctx.execute_tool_with_cancel(&waiter, child),
        ctx.execute_tool_with_cancel(&slow, parent.clone()),
    );
    assert!(!cancelled.is_success());
    assert!(finished.is_success());
    assert!(!parent.is_cancelled());
}

#[tokio::test]
async fn test_execute_tools_keeps_call_order_and_isolates_failures() {
    setup_tracing(Level::DEBUG);

    let mut ctx = Context::new();
    ctx.add_tool(calculator_definition(calculator_schema())).unwrap();
    ctx.add_tool(failing_tool("explode", "boom")).unwrap();

    let calls = [
        call("call_ok", "calculator", json!({"expression": "6*7"})),
        call("call_throws", "explode", json!({})),
    ];
    let results = ctx.execute_tools(&calls).await;
    assert_eq!(results.len(), 2);

    match &results[0] {
        ExecuteToolResult::Success { tool_call_id, result } => {
            assert_eq!(tool_call_id, "call_ok");
            assert_eq!(result["result"], json!(42.0));
        }
        other => panic!("Expected success, got {other:?}"),
    }
    match &results[1] {
        ExecuteToolResult::Failure { tool_call_id, error } => {
            assert_eq!(tool_call_id, "call_throws");
            assert_eq!(error.kind, ToolErrorKind::ExecutionFailed);
            assert_eq!(error.tool_name, "explode");
            assert!(error.message.contains("boom"));
        }
        other => panic!("Expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_execute_tools_order_when_later_call_finishes_first() {
    let mut ctx = Context::new();
    ctx.add_tool(slow_echo("slow", Duration::from_millis(80))).unwrap();
    ctx.add_tool(slow_echo("fast", Duration::from_millis(1))).unwrap();

    let calls = [
        call("c1", "slow", json!({"n": 1})),
        call("c2", "fast", json!({"n": 2})),
    ];
    let results = ctx.execute_tools(&calls).await;
    let ids: Vec<_> = results.iter().map(ExecuteToolResult::tool_call_id).collect();
    assert_eq!(ids, ["c1", "c2"]);
    assert!(results.iter().all(ExecuteToolResult::is_success));
}

#[tokio::test]
async fn test_invalid_arguments_and_unknown_tools() {
    let mut ctx = Context::new();
    ctx.add_tool(calculator_definition(calculator_schema())).unwrap();

    let results = ctx
        .execute_tools(&[
            call("a", "calculator", json!({"expression": 7})),
            call("b", "calculator", json!({})),
            call("c", "not_registered", json!({})),
        ])
        .await;
    for result in &results {
        match result {
            ExecuteToolResult::Failure { error, .. } => assert_eq!(error.kind, ToolErrorKind::InvalidArgs),
            other => panic!("Expected invalid_args, got {other:?}"),
        }
    }

    // Failures flow back to the model as error results
    let as_results: Vec<ToolResult> = results.into_iter().map(ToolResult::from).collect();
    assert!(as_results.iter().all(|r| r.is_error));
    assert_eq!(as_results[2].tool_call_id, "c");
}

#[test]
fn test_duplicate_tool_registration_fails() {
    let mut ctx = Context::new();
    ctx.add_tool(calculator_definition(calculator_schema())).unwrap();
    let err = ctx.add_tool(ToolDefinition::typed(CalculatorTool).unwrap()).unwrap_err();
    assert!(matches!(err, Error::DuplicateTool(name) if name == "calculator"));
    assert_eq!(ctx.list_tools().len(), 1);
}
