use crate::consts::WEBHOOK_TIMEOUT;
use crate::types::CallRecord;

use tracing::{debug, error, info, warn};

/// Posts the finished call record to the webhook.  Best effort: one attempt, failures are logged
/// and dropped.
#[derive(Clone)]
pub struct Reporter {
    http_client: reqwest::Client,
    webhook_url: String,
}

impl Reporter {
    pub fn new(http_client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            http_client,
            webhook_url: webhook_url.into(),
        }
    }

    pub async fn report(&self, record: &CallRecord) {
        match serde_json::to_string_pretty(record) {
            Ok(json) => debug!(payload=%json, "webhook data payload"),
            Err(e) => warn!(error=%e, "failed to render webhook payload for logging"),
        }
        let resp = self
            .http_client
            .post(&self.webhook_url)
            .json(record)
            .timeout(WEBHOOK_TIMEOUT)
            .send()
            .await;
        match resp {
            Ok(resp) if resp.status().is_success() => {
                info!(status=%resp.status(), "call record delivered");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(status=%status, body=%body, "webhook returned non-success status");
            }
            Err(e) => {
                error!(error=%e, url=%self.webhook_url, "failed to send webhook");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TranscriptTurn;
    use serde_json::json;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record() -> CallRecord {
        CallRecord {
            called_number: "unknown".to_string(),
            chat_transcript: vec![TranscriptTurn::user("Pronto?")],
            start_time: "2026-10-18T10:00:00+02:00".to_string(),
            end_time: "2026-10-18T10:00:42+02:00".to_string(),
            duration_seconds: 42.0,
        }
    }

    #[tokio::test]
    async fn posts_record_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calls"))
            .and(body_json(json!({
                "called_number": "unknown",
                "chat_transcript": ["user: Pronto?"],
                "start_time": "2026-10-18T10:00:00+02:00",
                "end_time": "2026-10-18T10:00:42+02:00",
                "duration_seconds": 42.0,
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        Reporter::new(reqwest::Client::new(), format!("{}/calls", server.uri()))
            .report(&record())
            .await;
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        Reporter::new(reqwest::Client::new(), server.uri())
            .report(&record())
            .await;

        let started = Instant::now();
        Reporter::new(reqwest::Client::new(), "http://127.0.0.1:9/calls")
            .report(&record())
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
