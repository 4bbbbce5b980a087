//! Moving requests to vendors and server-sent events back
//!
//! Adapters build a `reqwest::Request` and read a stream of [`SseEvent`]s;
//! they never touch the network directly. [`http::HttpTransport`] is the
//! real implementation, [`mock::MockTransport`] replays scripted responses.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::HeaderMap;
use thiserror::Error;

pub mod http;
pub mod mock;
pub mod sse;

pub use http::HttpTransport;
pub use mock::{MockResponse, MockTransport, RecordedRequest};

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, when the server names its events
    pub event: Option<String>,
    /// All `data:` lines of the event joined with `\n`
    pub data: String,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, TransportError>> + Send>>;

/// Failures below the vendor protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },

    /// Connecting, sending, or reading the body failed
    #[error("Network error: {0}")]
    Network(String),

    /// The body is not a stream this client will accept
    #[error("Malformed stream: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Network(e.to_string())
    }
}

/// Sends vendor requests and yields the SSE response stream
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Executes `request`
    ///
    /// Non-success statuses must be reported as [`TransportError::Status`]
    /// with the response body, not as a stream.
    async fn send(&self, request: reqwest::Request) -> Result<EventStream, TransportError>;
}

/// Reads the retry hint from `retry-after-ms` or `retry-after` (seconds)
///
/// # Examples
///
/// ```
/// use crosstalk_core::transport::parse_retry_after;
/// use reqwest::header::{HeaderMap, HeaderValue};
/// use std::time::Duration;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("retry-after", HeaderValue::from_static("20"));
/// assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(20)));
///
/// headers.insert("retry-after-ms", HeaderValue::from_static("1500"));
/// assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));
/// ```
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

    if let Some(ms) = header("retry-after-ms").and_then(|v| v.parse::<f64>().ok()) {
        if ms.is_finite() && ms >= 0.0 {
            return Some(Duration::from_secs_f64(ms / 1000.0));
        }
    }
    header("retry-after")
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
