//! Structured-output client for Anthropic-style messages APIs.
//!
//! One POST per protocol operation. The prompt carries the target's
//! plain-fields schema; the response's text content is parsed back through
//! the shared validation path, so the retry contract (one transport retry,
//! one correction-hint retry) applies uniformly.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use nodeflow_core::{Chosen, LmBackend, NodeDescriptor, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::RemoteLmConfig;
use crate::prompt::{choose_prompt, fill_prompt};
use crate::support::{choose_via, fill_via};

const API_VERSION: &str = "2023-06-01";

/// Remote messages-API backend.
#[derive(Clone)]
pub struct ApiLm {
    config: RemoteLmConfig,
    client: Client,
}

impl ApiLm {
    pub fn new(config: RemoteLmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// One completion round trip: prompt in, concatenated text content out.
    async fn complete(&self, prompt: String) -> anyhow::Result<String> {
        let request = ApiRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: prompt,
            }],
        };

        let url = format!("{}/v1/messages", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("API returned {}: {}", status, body));
        }

        let parsed: ApiResponse = response.json().await.context("malformed API response")?;
        debug!(
            model = %parsed.model,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "completion received"
        );
        let text: String = parsed
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect();
        if text.is_empty() {
            return Err(anyhow!("API response contained no text content"));
        }
        Ok(text)
    }
}

#[async_trait]
impl LmBackend for ApiLm {
    async fn choose_type(
        &self,
        candidates: &[Arc<NodeDescriptor>],
        allows_end: bool,
        context: &Map<String, Value>,
    ) -> Result<Chosen> {
        choose_via(candidates, allows_end, |hint| {
            let prompt = choose_prompt(candidates, allows_end, context, hint.as_deref());
            self.complete(prompt)
        })
        .await
    }

    async fn fill(
        &self,
        target: &Arc<NodeDescriptor>,
        context: &Map<String, Value>,
        instruction: &str,
    ) -> Result<Map<String, Value>> {
        fill_via(target, |hint| {
            let prompt = fill_prompt(target, context, instruction, hint.as_deref());
            self.complete(prompt)
        })
        .await
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    content: Vec<ApiContent>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ApiContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_is_concatenated() {
        let raw = serde_json::json!({
            "model": "m",
            "content": [
                {"type": "text", "text": "{\"x\": "},
                {"type": "tool_use", "text": null},
                {"type": "text", "text": "1}"},
            ],
            "usage": {"input_tokens": 3, "output_tokens": 2},
        });
        let parsed: ApiResponse = serde_json::from_value(raw).unwrap();
        let text: String = parsed
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect();
        assert_eq!(text, "{\"x\": 1}");
    }
}
