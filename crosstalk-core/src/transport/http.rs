use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use tracing::{debug, error, info, instrument, trace};

use super::sse::decode_stream;
use super::{EventStream, Transport, TransportError, parse_retry_after};

/// HTTP Transport implementation for making API requests to LLM providers
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    /// HTTP client for making requests
    client: Client,
    /// Upper bound on one whole exchange, streaming included
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a new HTTP transport with default configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::transport::HttpTransport;
    ///
    /// let transport = HttpTransport::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new HTTP transport with a custom client
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::transport::HttpTransport;
    /// use reqwest::Client;
    ///
    /// let client = Client::new();
    /// let transport = HttpTransport::with_client(client);
    /// ```
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(url = %request.url()), level = "debug")]
    async fn send(&self, mut request: reqwest::Request) -> Result<EventStream, TransportError> {
        if let Some(timeout) = self.timeout {
            *request.timeout_mut() = Some(timeout);
        }
        trace!("Request headers: {:#?}", request.headers().keys().collect::<Vec<_>>());

        let response = self.client.execute(request).await.map_err(|e| {
            error!("HTTP request failed: {}", e);
            TransportError::from(e)
        })?;

        let status = response.status();
        info!("Received response with status: {}", status);
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            debug!(%status, ?retry_after, "Vendor rejected request: {}", body);
            return Err(TransportError::Status {
                status: status.as_u16(),
                retry_after,
                body,
            });
        }

        let chunks = response
            .bytes_stream()
            .map_err(TransportError::from)
            .boxed();
        Ok(decode_stream(chunks))
    }
}
