use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::{Generation, TextGenerator};
use super::error::TextGenError;
use super::types::{MessagesRequest, MessagesResponse};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const SYSTEM_PROMPT: &str = "You are a job runner assistant. Be direct, practical, and output structured results.";

/// Longest rate-limit wait honoured before the single retry.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

/// Anthropic Messages API client.
pub struct AnthropicClient {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self, TextGenError> {
        Self::with_base_url(api_key, model, API_URL)
    }

    /// Client against a custom endpoint, used by tests.
    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, TextGenError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            base_url: base_url.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn send_message(&self, req: &MessagesRequest) -> Result<MessagesResponse, TextGenError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(TextGenError::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TextGenError::Api {
                status: status.as_u16(),
                message: message.chars().take(800).collect(),
            });
        }

        Ok(response.json::<MessagesResponse>().await?)
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn generate(&self, prompt: &str) -> Result<Generation, TextGenError> {
        let req = MessagesRequest::single(&self.model, Some(SYSTEM_PROMPT), prompt);

        let response = match self.send_message(&req).await {
            Err(TextGenError::RateLimited { retry_after_ms }) => {
                let wait = Duration::from_millis(retry_after_ms).min(MAX_RATE_LIMIT_WAIT);
                warn!(wait_ms = wait.as_millis() as u64, "rate limited, retrying once");
                tokio::time::sleep(wait).await;
                self.send_message(&req).await?
            }
            other => other?,
        };

        let text = response.text();
        let tokens = response.usage.total();
        debug!(model = %response.model, chars = text.len(), tokens, "generation finished");
        if text.trim().is_empty() {
            return Err(TextGenError::Empty);
        }
        Ok(Generation { text, tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(text: &str) -> serde_json::Value {
        json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": text}],
            "model": "claude-test",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 30}
        })
    }

    async fn client(server: &MockServer) -> AnthropicClient {
        AnthropicClient::with_base_url("test-key", "claude-test", &server.uri()).unwrap()
    }

    #[tokio::test]
    async fn generate_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("a plan")))
            .expect(1)
            .mount(&server)
            .await;

        let generation = client(&server).await.generate("plan it").await.unwrap();
        assert_eq!(generation.text, "a plan");
        assert_eq!(generation.tokens, 42);
    }

    #[tokio::test]
    async fn api_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        match client(&server).await.generate("x").await {
            Err(TextGenError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_is_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("after wait")))
            .mount(&server)
            .await;

        let generation = client(&server).await.generate("x").await.unwrap();
        assert_eq!(generation.text, "after wait");
    }

    #[tokio::test]
    async fn persistent_rate_limit_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server).await.generate("x").await.unwrap_err();
        assert!(matches!(err, TextGenError::RateLimited { retry_after_ms: 0 }));
    }

    #[tokio::test]
    async fn blank_reply_is_empty_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("   ")))
            .mount(&server)
            .await;

        let err = client(&server).await.generate("x").await.unwrap_err();
        assert!(matches!(err, TextGenError::Empty));
    }
}
