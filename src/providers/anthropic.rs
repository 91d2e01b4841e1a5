use crate::config::GenerationConfig;
use crate::providers::{api_error, traits::TextProvider};
use crate::session::{Turn, TurnRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct AnthropicProvider {
    /// Pre-computed `x-api-key` header value; `None` when no key is configured.
    cached_auth: Option<String>,
    cached_messages_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: Vec<ResponseContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Unsupported,
}

impl AnthropicProvider {
    pub fn new(generation: &GenerationConfig) -> Self {
        Self::with_base_url(generation, None)
    }

    pub fn with_base_url(generation: &GenerationConfig, base_url: Option<&str>) -> Self {
        let base = base_url
            .map_or("https://api.anthropic.com", |u| u.trim_end_matches('/'))
            .to_string();
        let cached_messages_url = format!("{base}/v1/messages");
        let cached_auth = generation
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(ToString::to_string);
        Self {
            cached_auth,
            cached_messages_url,
            model: generation.model.clone(),
            max_tokens: generation.max_tokens,
            temperature: generation.temperature,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(std::time::Duration::from_secs(90))
                .tcp_keepalive(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn build_request(&self, system_prompt: &str, history: &[Turn]) -> ChatRequest {
        let messages = history
            .iter()
            .filter(|turn| turn.role != TurnRole::System)
            .map(|turn| Message {
                role: match turn.role {
                    TurnRole::Assistant => "assistant",
                    TurnRole::User | TurnRole::System => "user",
                },
                content: turn.content.clone(),
            })
            .collect();

        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: if system_prompt.is_empty() {
                None
            } else {
                Some(system_prompt.to_string())
            },
            messages,
            temperature: self.temperature,
        }
    }

    fn extract_text(chat_response: &ChatResponse) -> anyhow::Result<String> {
        let text = chat_response
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Unsupported => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            anyhow::bail!("No response from Anthropic");
        }
        Ok(text)
    }
}

#[async_trait]
impl TextProvider for AnthropicProvider {
    async fn generate(&self, system_prompt: &str, history: &[Turn]) -> anyhow::Result<String> {
        let auth = self.cached_auth.as_ref().ok_or_else(|| {
            anyhow::anyhow!("Anthropic credentials not set. Set ANTHROPIC_API_KEY.")
        })?;

        let request = self.build_request(system_prompt, history);
        let response = self
            .client
            .post(&self.cached_messages_url)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .header("x-api-key", auth)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error("Anthropic", response).await);
        }

        let chat_response: ChatResponse = response.json().await?;
        Self::extract_text(&chat_response)
    }
}
