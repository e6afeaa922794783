use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Per-request sampling parameters, owned by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

/// Client for the completion oracle (Anthropic Messages API).
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let api_key = dotenv::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .context("Missing ANTHROPIC_API_KEY")?;
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string());
        let model = dotenv::var("LLM_MODEL")
            .unwrap_or_else(|_| "claude-3-sonnet-20240229".to_string());
        let timeout_secs = dotenv::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(300);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the messages endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/messages") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/messages", base)
        } else {
            format!("{}/v1/messages", base)
        }
    }

    fn request_body(&self, prompt: &str, params: &CompletionParams) -> serde_json::Value {
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];
        serde_json::json!({
            "model": self.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": messages,
        })
    }

    /// Single-shot, non-streaming completion. The prompt is the only message.
    pub async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        let body = self.request_body(prompt, params);
        debug!(
            model = %self.model,
            prompt_len = prompt.len(),
            max_tokens = params.max_tokens,
            "Sending completion request"
        );

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        if !status.is_success() {
            anyhow::bail!("Anthropic API error ({}): {}", status, text);
        }

        let content = parse_completion(&text)?;
        debug!(completion_len = content.len(), "Completion received");
        Ok(content)
    }
}

/// Concatenate the text blocks of a Messages API response.
fn parse_completion(body: &str) -> Result<String> {
    let resp: MessagesResponse =
        serde_json::from_str(body).context("Failed to parse LLM JSON")?;
    Ok(resp
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join(""))
}
