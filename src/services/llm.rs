//! Completion backend for conversational replies.

use super::ApiError;
use crate::config::LlmConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token ids suppressed in every reply so the persona description does not
/// leak into the output (" viewer", "friendly", "sassy" fragments, " opinion").
pub const SUPPRESSED_TOKENS: &[&str] = &[
    "19091", "1177", "13120", "8030", "1545", "6726", "33757", "562", "10705", "4107", "11720",
    "4459", "9317",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub n: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub stop: String,
    pub user: String,
    pub logit_bias: BTreeMap<String, i32>,
}

impl CompletionRequest {
    /// Request with the fixed sampling parameters used for chat replies.
    pub fn chat_reply(model: &str, prompt: String, channel: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt,
            max_tokens: 100,
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            presence_penalty: 2.0,
            frequency_penalty: 2.0,
            stop: ":".to_string(),
            user: channel.to_string(),
            logit_bias: SUPPRESSED_TOKENS
                .iter()
                .map(|t| (t.to_string(), -100))
                .collect(),
        }
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Returns the raw choice texts in order.
    async fn complete(&self, credential: &str, request: &CompletionRequest) -> Result<Vec<String>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
}

/// OpenAI-compatible `/completions` client.
pub struct OpenAiCompletions {
    client: Client,
    base_url: String,
}

impl OpenAiCompletions {
    pub fn new(config: &LlmConfig) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompletions {
    async fn complete(&self, credential: &str, request: &CompletionRequest) -> Result<Vec<String>, ApiError> {
        let response = self
            .client
            .post(format!("{}/completions", self.base_url))
            .bearer_auth(credential)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(body.choices.into_iter().map(|c| c.text).collect())
    }
}

/// Clean a raw completion: trim, drop a trailing partial line when there are
/// several, trim again.
pub fn tidy_completion(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.trim().split('\n').collect();
    if lines.len() > 1 {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}
