use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::transport::{OracleRequest, OracleTransport, TransportError};

const MAX_ERROR_BODY: usize = 512;

/// Connection settings for a Gemini-compatible `generateContent` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpOracleConfig {
    /// API base, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    pub endpoint: String,
    /// Model name.
    pub model: String,
    /// API key sent as the `key` query parameter.
    #[serde(default, skip_serializing)]
    pub api_key: String,
}

impl HttpOracleConfig {
    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

/// HTTP transport speaking the `generateContent` JSON shape.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpOracleConfig,
}

impl HttpTransport {
    /// Builds the transport; `timeout` bounds the whole HTTP exchange.
    pub fn new(config: HttpOracleConfig, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

fn response_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().map(|part| part.text).collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl OracleTransport for HttpTransport {
    async fn complete(&self, request: &OracleRequest) -> Result<String, TransportError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt() }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });
        let response = self
            .client
            .post(self.config.url())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Transport(err.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| TransportError::Transport(format!("malformed envelope: {err}")))?;
        response_text(parsed)
            .ok_or_else(|| TransportError::Transport("response carried no candidate text".into()))
    }
}
