// HTTP adapter for the completion port. Classifies reqwest failures into
// the boundary's four error classes; the service above maps those onto
// user-facing fallback replies.

use crate::core::assistant::{CompletionError, CompletionProvider};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct HttpCompletionClient {
    client: Client,
    url: String,
}

impl HttpCompletionClient {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build http client");
        Self { client, url }
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionClient {
    async fn complete(
        &self,
        prompt: &str,
        session_key: &str,
        image_url: Option<&str>,
    ) -> Result<String, CompletionError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("text", prompt), ("session", session_key)]);
        if let Some(image) = image_url {
            request = request.query(&[("imageUrl", image)]);
        }

        let response = request.send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::BadStatus(status.as_u16()));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|err| CompletionError::Malformed(err.to_string()))?;

        payload["result"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CompletionError::Malformed("missing result field".to_string()))
    }
}

fn classify(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Connection(err.to_string())
    }
}
