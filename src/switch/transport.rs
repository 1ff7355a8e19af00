//! Transport for outbound switch calls

use crate::error::{LookupError, LookupResult};
use crate::party::headers::OutboundHeaders;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A single outbound call toward the switch
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: OutboundHeaders,
    pub body: Option<serde_json::Value>,
}

/// Port for sending calls across the network boundary.
///
/// Sends are fire-and-forget from the relayer's point of view: the switch
/// acknowledges with `202` and answers later on an inbound route.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwitchTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> LookupResult<()>;
}

/// reqwest-backed transport
pub struct HttpSwitchClient {
    client: Client,
}

impl HttpSwitchClient {
    pub fn new(timeout: Duration) -> LookupResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SwitchTransport for HttpSwitchClient {
    async fn send(&self, request: OutboundRequest) -> LookupResult<()> {
        let started = Instant::now();
        let method_label = request.method.to_string();
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        crate::metrics::record_outbound_latency(&method_label, started.elapsed().as_secs_f64());

        let status = response.status();
        if status.is_success() {
            debug!("{} {} -> {}", method_label, request.url, status);
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            warn!("{} {} rejected with {}: {}", method_label, request.url, status, text);
            Err(LookupError::NetworkDelivery {
                url: request.url.to_string(),
                message: format!("status {}: {}", status, text),
            })
        }
    }
}
