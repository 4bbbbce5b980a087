use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::Value;
use tracing::debug;

use super::sse::decode_stream;
use super::{EventStream, Transport, TransportError};

/// A scripted reply for [`MockTransport`]
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A 200 response whose body arrives as these chunks
    Stream(Vec<String>),
    /// These chunks, then a body that never ends
    Stall(Vec<String>),
    /// The request never gets a response
    Hang,
    /// A non-success status
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    /// The connection fails before any response
    NetworkError(String),
}

impl MockResponse {
    /// A complete SSE body delivered in one chunk
    pub fn sse(body: impl Into<String>) -> Self {
        MockResponse::Stream(vec![body.into()])
    }

    /// Named events (`event:` + `data:`), as Anthropic sends them
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::transport::MockResponse;
    /// use serde_json::json;
    ///
    /// let response = MockResponse::named_events(&[("message_stop", json!({"type": "message_stop"}))]);
    /// assert!(matches!(response, MockResponse::Stream(ref chunks) if chunks[0].starts_with("event: message_stop\n")));
    /// ```
    pub fn named_events(events: &[(&str, Value)]) -> Self {
        MockResponse::Stream(
            events
                .iter()
                .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
                .collect(),
        )
    }

    /// Unnamed `data:` events, as OpenAI and Google send them
    pub fn data_events(events: &[Value]) -> Self {
        MockResponse::Stream(events.iter().map(|data| format!("data: {data}\n\n")).collect())
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        MockResponse::Status {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Sets the retry hint of a `Status` response; other variants are unchanged
    #[must_use]
    pub fn with_retry_after(mut self, hint: Duration) -> Self {
        if let MockResponse::Status { retry_after, .. } = &mut self {
            *retry_after = Some(hint);
        }
        self
    }

    /// Appends a raw chunk to a `Stream` or `Stall` body
    #[must_use]
    pub fn then_raw(mut self, chunk: impl Into<String>) -> Self {
        if let MockResponse::Stream(chunks) | MockResponse::Stall(chunks) = &mut self {
            chunks.push(chunk.into());
        }
        self
    }

    /// Turns a `Stream` into a `Stall` with the same chunks
    #[must_use]
    pub fn stalled(self) -> Self {
        match self {
            MockResponse::Stream(chunks) => MockResponse::Stall(chunks),
            other => other,
        }
    }
}

/// A request as seen by [`MockTransport`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    /// The JSON body, `Null` when absent or not JSON
    pub body: Value,
}

/// Mock transport for testing
///
/// Replies are consumed in the order they were queued. Every request is
/// recorded, including ones that receive an error. Clones share the queue
/// and the record, so a test can keep a handle after giving one to an
/// adapter.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Creates a new mock transport
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::transport::MockTransport;
    ///
    /// let transport = MockTransport::new();
    /// assert!(transport.requests().is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: MockResponse) -> &Self {
        lock(&self.responses).push_back(response);
        self
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Replies still queued
    pub fn pending(&self) -> usize {
        lock(&self.responses).len()
    }

    fn record(&self, request: &reqwest::Request) {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = request
            .body()
            .and_then(|body| body.as_bytes())
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
            .unwrap_or(Value::Null);
        lock(&self.requests).push(RecordedRequest {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers,
            body,
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: reqwest::Request) -> Result<EventStream, TransportError> {
        self.record(&request);
        let next = lock(&self.responses).pop_front();
        debug!(url = %request.url(), response = ?next.as_ref().map(std::mem::discriminant), "Mock transport replying");

        match next {
            Some(MockResponse::Stream(chunks)) => {
                Ok(decode_stream(stream::iter(chunks.into_iter().map(Ok))))
            }
            Some(MockResponse::Stall(chunks)) => Ok(decode_stream(
                stream::iter(chunks.into_iter().map(Ok)).chain(stream::pending()),
            )),
            Some(MockResponse::Hang) => futures::future::pending().await,
            Some(MockResponse::Status {
                status,
                retry_after,
                body,
            }) => Err(TransportError::Status {
                status,
                retry_after,
                body,
            }),
            Some(MockResponse::NetworkError(message)) => Err(TransportError::Network(message)),
            None => Err(TransportError::Network(
                "mock transport has no scripted response".to_string(),
            )),
        }
    }
}
