use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::{FailureCategory, Outcome, Prober, probe_timeout};
use crate::endpoint::Endpoint;

const USER_AGENT: &str = concat!("pulse/", env!("CARGO_PKG_VERSION"));

/// Prober issuing real HTTP requests through a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout_ceiling: Duration,
}

impl HttpProber {
    pub fn new(timeout_ceiling: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_client(client, timeout_ceiling))
    }

    pub fn with_client(client: reqwest::Client, timeout_ceiling: Duration) -> Self {
        Self { client, timeout_ceiling }
    }

    pub fn timeout_for(&self, endpoint: &Endpoint) -> Duration {
        probe_timeout(endpoint.interval(), self.timeout_ceiling)
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &Endpoint) -> Outcome {
        let deadline = self.timeout_for(endpoint);
        let request = self
            .client
            .request(endpoint.method.into(), &endpoint.url)
            .timeout(deadline);

        let start = Instant::now();
        // `send` resolves once the response headers are in; the body is never read.
        let result = tokio::time::timeout(deadline, request.send()).await;
        let latency = start.elapsed();

        let outcome = match result {
            Err(_elapsed) => Outcome::Timeout { latency },
            Ok(Ok(response)) => {
                Outcome::from_status(endpoint.expected_status, response.status().as_u16(), latency)
            }
            Ok(Err(err)) if err.is_timeout() => Outcome::Timeout { latency },
            Ok(Err(err)) => {
                let category = FailureCategory::of(&err);
                debug!(endpoint_id = endpoint.id, error = %err, %category, "probe request failed");
                Outcome::NetworkFailure { category, latency }
            }
        };

        debug!(
            endpoint_id = endpoint.id,
            method = %endpoint.method,
            url = %endpoint.url,
            %outcome,
            "probe finished"
        );
        outcome
    }
}
