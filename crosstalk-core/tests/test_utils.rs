#![allow(dead_code)]

use std::env;
use std::sync::Arc;

use crosstalk_core::transport::MockTransport;
use crosstalk_core::{
    AnthropicAdapter, AnthropicConfig, GoogleAdapter, GoogleConfig, OpenAIAdapter, OpenAIConfig,
};
use dotenv::dotenv;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry};

/// Helper function to set up tracing for tests
pub fn setup_tracing(level: Level) {
    let subscriber = registry()
        .with(
            fmt::layer()
                .with_test_writer()
                .with_ansi(false) // Better for CI logs
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            EnvFilter::from_default_env()
                .add_directive(level.into())
                .add_directive("reqwest=info".parse().unwrap())
                .add_directive("hyper=info".parse().unwrap()),
        );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn api_key(var: &str) -> Option<String> {
    dotenv().ok();
    env::var(var).ok().filter(|key| !key.is_empty())
}

/// Get a live Anthropic adapter if an API key is available
pub fn get_anthropic_adapter(model: &str) -> Option<AnthropicAdapter> {
    let key = api_key("ANTHROPIC_API_KEY")?;
    AnthropicAdapter::with_config(
        model,
        AnthropicConfig {
            api_key: key.into(),
            ..Default::default()
        },
    )
    .ok()
}

/// Get a live OpenAI adapter if an API key is available
pub fn get_openai_adapter(model: &str) -> Option<OpenAIAdapter> {
    let key = api_key("OPENAI_API_KEY")?;
    OpenAIAdapter::with_config(
        model,
        OpenAIConfig {
            api_key: key.into(),
            ..Default::default()
        },
    )
    .ok()
}

/// Get a live Gemini adapter if an API key is available
pub fn get_google_adapter(model: &str) -> Option<GoogleAdapter> {
    let key = api_key("GEMINI_API_KEY")?;
    GoogleAdapter::with_config(
        model,
        GoogleConfig {
            api_key: key.into(),
            ..Default::default()
        },
    )
    .ok()
}

/// Anthropic adapter wired to `transport`
pub fn mock_anthropic(model: &str, transport: &MockTransport) -> AnthropicAdapter {
    AnthropicAdapter::with_config(
        model,
        AnthropicConfig {
            api_key: "test-key".into(),
            base_url: "https://anthropic.test/v1".to_string(),
            ..Default::default()
        },
    )
    .unwrap()
    .with_transport(Arc::new(transport.clone()))
}

/// OpenAI adapter wired to `transport`
pub fn mock_openai(model: &str, transport: &MockTransport) -> OpenAIAdapter {
    OpenAIAdapter::with_config(
        model,
        OpenAIConfig {
            api_key: "test-key".into(),
            base_url: "https://openai.test/v1".to_string(),
            organization: Some("org-test".to_string()),
            request_timeout: None,
        },
    )
    .unwrap()
    .with_transport(Arc::new(transport.clone()))
}

/// Gemini adapter wired to `transport`
pub fn mock_google(model: &str, transport: &MockTransport) -> GoogleAdapter {
    GoogleAdapter::with_config(
        model,
        GoogleConfig {
            api_key: "test-key".into(),
            base_url: "https://gemini.test/v1beta".to_string(),
            ..Default::default()
        },
    )
    .unwrap()
    .with_transport(Arc::new(transport.clone()))
}
