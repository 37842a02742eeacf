//! AI summary providers. Both talk an OpenAI-style chat-completions API;
//! they differ only in endpoint, model and key.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::config::Config;

/// Fixed system prompt: 3-7 lowercase English keywords, comma-separated and
/// alphabetically sorted; promotional content answers with the literal
/// token `ad`.
pub const SYSTEM_PROMPT: &str = "Extract 3-7 keywords from this post that identify the core event. Output ONLY lowercase keywords separated by commas, sorted alphabetically.

RULES:
1. Extract: main subject, action verb (base form), object, key numbers, locations, person names
2. ALWAYS include specific person names (first and last as separate keywords): \"elon\", \"musk\", \"trump\", \"zelensky\"
3. ALWAYS include specific place names: \"kyiv\", \"turkey\", \"gaza\", \"beijing\"
4. Use base verb forms: \"kill\" not \"killed/killing\", \"attack\" not \"attacked\"
5. Normalize country names: \"usa\" not \"united states\", \"uk\" not \"britain\"
6. Numbers: use digits \"44b\" not \"44 billion\", \"1000\" not \"1k\"
7. No articles (a/an/the), no adjectives, no adverbs
8. No temporal words (today/yesterday/now)
9. Sort alphabetically
10. Translate everything to English

For ads/promos with no news, respond: ad

Examples:
Input: \"BREAKING: Tesla CEO Elon Musk announced buying Twitter for $44 billion!\"
Output: 44b, acquire, elon, musk, tesla, twitter

Input: \"Massive earthquake in Turkey kills thousands, rescue efforts underway\"
Output: earthquake, kill, thousands, turkey

Input: \"Russian forces attack Kyiv with drones overnight\"
Output: attack, drone, kyiv, russia

Input: \"Netanyahu meets Biden in Washington to discuss Gaza ceasefire\"
Output: biden, ceasefire, gaza, meet, netanyahu, washington

Input: \"Subscribe for more updates! Like and share!\"
Output: ad";

/// Longest single backoff before the call gives up for this run.
const MAX_BACKOFF_SECS: u64 = 60;

fn thinking_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>\s*").unwrap())
}

/// Strip a bracketed "thinking" block some models prepend.
pub fn strip_thinking(content: &str) -> String {
    thinking_pattern().replace_all(content, "").trim().to_string()
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_configured(&self) -> bool;

    /// Keywords for one message, or None after retries are exhausted.
    async fn generate_summary(&self, message_text: &str, max_retries: u32) -> Option<String>;
}

/// OpenAI-style chat-completions provider.
pub struct ChatProvider {
    name: &'static str,
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatProvider {
    pub fn mistral(api_key: String, model: String) -> Self {
        ChatProvider {
            name: "Mistral",
            api_url: "https://api.mistral.ai/v1/chat/completions".to_string(),
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn cerebras(api_key: String, model: String) -> Self {
        ChatProvider {
            name: "Cerebras",
            api_url: "https://api.cerebras.ai/v1/chat/completions".to_string(),
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Endpoint override for tests and self-hosted gateways.
    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }

    fn backoff_secs(response: Option<&reqwest::Response>, attempt: u32) -> u64 {
        response
            .and_then(|r| r.headers().get("Retry-After"))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1 << attempt)
    }
}

#[async_trait]
impl AiProvider for ChatProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate_summary(&self, message_text: &str, max_retries: u32) -> Option<String> {
        if self.api_key.is_empty() {
            error!("{} API key not configured", self.name);
            return None;
        }

        let payload = json!({
            "model": self.model,
            "max_tokens": 100,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": message_text},
            ],
        });

        for attempt in 0..max_retries {
            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .timeout(Duration::from_secs(30))
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    error!("{} API error: {e}", self.name);
                    return None;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let wait = Self::backoff_secs(Some(&response), attempt);
                if wait > MAX_BACKOFF_SECS {
                    warn!(
                        "{} rate limited, Retry-After={wait}s is too long, skipping",
                        self.name
                    );
                    return None;
                }
                warn!(
                    "{} returned {status}, waiting {wait}s before retry {}/{max_retries}",
                    self.name,
                    attempt + 1
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }
            if !status.is_success() {
                error!("{} API error: HTTP {status}", self.name);
                return None;
            }

            let body: Value = match response.json().await {
                Ok(v) => v,
                Err(e) => {
                    error!("{}: unexpected API response: {e}", self.name);
                    return None;
                }
            };
            let Some(content) = body["choices"][0]["message"]["content"].as_str() else {
                error!("{}: unexpected API response format", self.name);
                return None;
            };
            return Some(strip_thinking(content));
        }

        error!(
            "{} API failed after {max_retries} retries (rate limited)",
            self.name
        );
        None
    }
}

/// Provider selection: an explicit name, or `auto` taking the first
/// configured one (Mistral before Cerebras).
pub fn provider_from_env(config: &Config) -> Option<Box<dyn AiProvider>> {
    let make = |name: &str| -> Option<Box<dyn AiProvider>> {
        let provider: Box<dyn AiProvider> = match name {
            "mistral" => Box::new(ChatProvider::mistral(
                config.mistral_api_key.clone(),
                config.mistral_model.clone(),
            )),
            "cerebras" => Box::new(ChatProvider::cerebras(
                config.cerebras_api_key.clone(),
                config.cerebras_model.clone(),
            )),
            _ => return None,
        };
        Some(provider)
    };

    match config.ai_provider.to_lowercase().as_str() {
        name @ ("mistral" | "cerebras") => {
            let provider = make(name)?;
            if provider.is_configured() {
                Some(provider)
            } else {
                warn!("AI provider '{name}' selected but not configured");
                None
            }
        }
        "auto" => {
            for name in ["mistral", "cerebras"] {
                if let Some(provider) = make(name) {
                    if provider.is_configured() {
                        info!("using AI provider: {}", provider.name());
                        return Some(provider);
                    }
                }
            }
            None
        }
        other => {
            warn!("unknown AI provider: {other}");
            None
        }
    }
}
