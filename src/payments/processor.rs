//! Downstream payment processor client.
//!
//! # Responsibilities
//! - Send `POST <base>/payments` with `{correlationId, amount, requestedAt}`
//! - Report the response status, or a transport failure
//! - Bound every call with connect and request deadlines
//!
//! # Design Decisions
//! - The client never interprets status codes; the dispatch engine classifies them
//! - Timeouts are transport failures so a stalled processor cannot pin a worker

use async_trait::async_trait;
use std::time::{Duration, Instant};
use url::Url;

use crate::observability::metrics;
use crate::payments::types::{PaymentSubmission, Processor};

/// Transport-level failure talking to a processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("{0} processor timed out")]
    Timeout(Processor),
    #[error("{0} processor request failed: {1}")]
    Transport(Processor, String),
    #[error("invalid processor url {0}: {1}")]
    InvalidUrl(String, String),
}

/// A downstream payment processor endpoint.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Which processor this is.
    fn kind(&self) -> Processor;

    /// Submit the payment and return the HTTP status the processor answered with.
    async fn submit(&self, submission: &PaymentSubmission) -> Result<u16, ProcessorError>;
}

/// HTTP implementation backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpProcessor {
    kind: Processor,
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpProcessor {
    /// Build a client for the processor at `base_url`.
    pub fn new(
        kind: Processor,
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join("/payments"))
            .map_err(|e| ProcessorError::InvalidUrl(base_url.to_string(), e.to_string()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .tcp_nodelay(true)
            .pool_max_idle_per_host(2048)
            .build()
            .map_err(|e| ProcessorError::Transport(kind, e.to_string()))?;

        Ok(Self {
            kind,
            endpoint,
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl PaymentProcessor for HttpProcessor {
    fn kind(&self) -> Processor {
        self.kind
    }

    async fn submit(&self, submission: &PaymentSubmission) -> Result<u16, ProcessorError> {
        let start = Instant::now();
        let result = self
            .client
            .post(self.endpoint.clone())
            .json(submission)
            .send()
            .await;
        metrics::record_processor_call(self.kind, start);

        match result {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(ProcessorError::Timeout(self.kind)),
            Err(e) => Err(ProcessorError::Transport(self.kind, e.to_string())),
        }
    }
}
