//! Operational fault delivery to a Slack incoming webhook.

use std::time::Duration;

use pulse::{FaultSink, OperationalFault};
use serde_json::json;
use tracing::warn;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SlackFaultSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackFaultSink {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { client, webhook_url: webhook_url.into() })
    }

    fn message(fault: &OperationalFault) -> String {
        format!(":rotating_light: pulse: {fault}")
    }
}

#[async_trait::async_trait]
impl FaultSink for SlackFaultSink {
    async fn report(&self, fault: &OperationalFault) {
        let body = json!({ "text": Self::message(fault) });
        let result = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        // Delivery failures stay in this sink
        if let Err(err) = result {
            warn!(error = %err, "slack alert delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fault() -> OperationalFault {
        OperationalFault::LogWriteFailed { endpoint_id: 7, attempts: 3, error: "database is locked".to_string() }
    }

    #[tokio::test]
    async fn test_posts_fault_text() {
        let server = MockServer::start().await;
        let expected = json!({ "text": SlackFaultSink::message(&fault()) });
        Mock::given(method("POST"))
            .and(body_json(&expected))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = SlackFaultSink::new(server.uri()).unwrap();
        sink.report(&fault()).await;
    }

    #[tokio::test]
    async fn test_webhook_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let sink = SlackFaultSink::new(server.uri()).unwrap();
        sink.report(&fault()).await;
    }

    #[test]
    fn test_message_mentions_endpoint() {
        assert!(SlackFaultSink::message(&fault()).contains("endpoint 7"));
    }
}
