//! Runs a tool-using conversation against Anthropic with a typed weather tool.
//!
//! ```sh
//! ANTHROPIC_API_KEY=... cargo run --example tool_loop
//! ```

use async_trait::async_trait;
use crosstalk_core::{
    Adapter, AnthropicAdapter, AnthropicOptions, AskInput, AskOptions, BoxError, Context, StopReason, ToolDefinition,
    ToolResult, TypedTool,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize, JsonSchema)]
struct WeatherRequest {
    /// City and country, e.g. "Paris, France"
    location: String,
    units: Option<String>,
}

#[derive(Debug, Serialize)]
struct WeatherResponse {
    location: String,
    temperature: f64,
    units: String,
    conditions: &'static str,
}

struct WeatherTool;

#[async_trait]
impl TypedTool for WeatherTool {
    type Input = WeatherRequest;
    type Output = WeatherResponse;

    fn name(&self) -> String {
        "get_weather".to_string()
    }

    fn description(&self) -> String {
        "Get current weather for a location".to_string()
    }

    async fn call(&self, input: WeatherRequest, _cancel: CancellationToken) -> Result<WeatherResponse, BoxError> {
        Ok(WeatherResponse {
            location: input.location,
            temperature: 22.0,
            units: input.units.unwrap_or_else(|| "celsius".to_string()),
            conditions: "partly cloudy",
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let adapter = AnthropicAdapter::new("claude-3-5-haiku-20241022");
    let mut ctx = Context::new().with_system_message("You are a helpful assistant. Use tools when useful.");
    ctx.add_tool(ToolDefinition::typed(WeatherTool)?)?;

    let mut input = AskInput::text("What's the weather in Paris and in Lyon?");
    for turn in 1..=5 {
        let response = adapter
            .ask(
                input,
                AskOptions::new(AnthropicOptions {
                    max_tokens: Some(1024),
                    ..Default::default()
                })
                .with_context(&mut ctx)
                .on_chunk(|text| print!("{text}")),
            )
            .await?;
        println!();
        info!(turn, stop_reason = ?response.stop_reason, cost = response.cost, "Turn finished");

        if response.stop_reason != StopReason::ToolCall {
            break;
        }
        let results: Vec<ToolResult> = ctx
            .execute_tools(&response.message.tool_calls)
            .await
            .into_iter()
            .map(ToolResult::from)
            .collect();
        input = AskInput::from(results);
    }

    println!(
        "Used {} tokens for ${:.6}",
        ctx.token_usage().total(),
        ctx.total_cost()
    );
    Ok(())
}
