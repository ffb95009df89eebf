//! Language-model oracle for the two questions the rules cannot answer:
//! "which region is this settlement in?" and "what does this message
//! mention?" when no pattern fired.
//!
//! Talks to any OpenAI-compatible chat endpoint (a local
//! [Ollama](https://ollama.com/) by default).  Every failure is an empty
//! answer (fail-open); callers treat the oracle as optional.
//!
//! ```env
//! LLM_ENABLED=true
//! LLM_MODEL=qwen2.5:7b                      # default
//! LLM_ENDPOINT=http://127.0.0.1:11434        # default (Ollama)
//! LLM_TIMEOUT_MS=3000                         # default
//! LLM_API_KEY=...                             # only for hosted endpoints
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pipeline::{Oracle, OracleEvent};

// ─────────────────────────── System prompts ──────────────────────────────

const REGION_PROMPT: &str = r#"You are a Ukrainian geography reference.

You receive the name of a settlement in Ukraine, optionally with a region hint.
Answer with the first-level administrative region (oblast) that contains it.

Rules:
- Answer in Ukrainian, in the form "<Adjective> обл." (e.g. "Харківська обл."), or "АР Крим".
- If several settlements share the name and the hint does not disambiguate, answer null.
- If you are not sure the settlement exists, answer null. Never guess.

Reply ONLY with a JSON object, nothing else:
{"region": "Харківська обл."}   or   {"region": null}
"#;

const PARSE_PROMPT: &str = r#"You are a Ukrainian air-raid alert parser.

You receive a Telegram message (Ukrainian or Russian) from an alert channel that the automatic rules could not parse.

Your job: list every settlement the message reports as under a CURRENT threat.

Rules:
- Only settlements written in the message. Never add places that are not in the text.
- Convert each settlement name to the nominative case.
- Ignore recaps, statistics, forecasts and analytical text; return an empty list for them.
- "type" is one of: Drone, Rocket, GuidedBomb, Explosion, BallisticThreat, Reconnaissance.
- "region" is the oblast as written or implied by the message, or null.

Reply ONLY with a JSON object, nothing else:
{"events": [{"city": "Суми", "region": "Сумська обл.", "type": "Drone"}]}
Empty list = nothing to report: {"events": []}
"#;

/// Longest message prefix sent to the model.
const MAX_PROMPT_CHARS: usize = 800;

// ─────────────────────────── Data types ──────────────────────────────────

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct RegionAnswer {
    region: Option<String>,
}

#[derive(Deserialize)]
struct ParseAnswer {
    #[serde(default)]
    events: Vec<OracleEvent>,
}

// ─────────────────────────── LlmOracle ───────────────────────────────────

/// Async oracle client.  Constructed once, shared behind an `Arc`.
pub struct LlmOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl LlmOracle {
    /// Build from environment variables; `None` unless `LLM_ENABLED`.
    ///
    /// | Env var          | Default                    | Description                   |
    /// |------------------|----------------------------|-------------------------------|
    /// | `LLM_ENABLED`    | `false`                    | Enable the oracle             |
    /// | `LLM_MODEL`      | `qwen2.5:7b`               | Model name                    |
    /// | `LLM_ENDPOINT`   | `http://127.0.0.1:11434`   | OpenAI-compatible server URL  |
    /// | `LLM_TIMEOUT_MS` | `3000`                     | Request timeout in ms         |
    /// | `LLM_API_KEY`    | —                          | Bearer token, when required   |
    pub fn from_env() -> Option<Self> {
        let enabled = std::env::var("LLM_ENABLED")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if !enabled {
            return None;
        }

        let endpoint =
            std::env::var("LLM_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:11434".into());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "qwen2.5:7b".into());
        let timeout_ms: u64 = std::env::var("LLM_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);
        let api_key = std::env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty());

        Some(Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// Send one system+user exchange and decode the JSON reply.  `None` on
    /// any failure.
    async fn ask<T: DeserializeOwned>(&self, system: &str, user: String, max_tokens: u32) -> Option<T> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.into(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            max_tokens,
            response_format: Some(ResponseFormat {
                r#type: "json_object",
            }),
        };

        let url = format!("{}/v1/chat/completions", self.endpoint);
        let mut builder = self.client.post(&url).timeout(self.timeout).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("LLM request failed (fail-open): {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!("LLM returned HTTP {} (fail-open)", response.status());
            return None;
        }

        let body = match response.json::<ChatResponse>().await {
            Ok(b) => b,
            Err(e) => {
                warn!("LLM response parse failed (fail-open): {e}");
                return None;
            }
        };
        let Some(content) = body.choices.first().map(|c| c.message.content.as_str()) else {
            warn!("LLM returned no choices (fail-open)");
            return None;
        };
        debug!("LLM raw answer: {content}");

        match serde_json::from_str(strip_code_fence(content)) {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!("LLM JSON parse failed (fail-open): {e}; raw: {content}");
                None
            }
        }
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn ask_region(&self, city: &str, region_hint: Option<&str>) -> Option<String> {
        let user = match region_hint {
            Some(hint) => format!("Settlement: {city}\nRegion hint: {hint}"),
            None => format!("Settlement: {city}"),
        };
        let answer: RegionAnswer = self.ask(REGION_PROMPT, user, 40).await?;
        let region = answer.region.filter(|r| !r.trim().is_empty())?;
        info!("LLM region for {city}: {region}");
        Some(region)
    }

    async fn ask_parse(&self, text: &str) -> Vec<OracleEvent> {
        let truncated: String = text.chars().take(MAX_PROMPT_CHARS).collect();
        let user = format!("Message from channel:\n```\n{truncated}\n```\n\nParse:");
        match self.ask::<ParseAnswer>(PARSE_PROMPT, user, 300).await {
            Some(answer) => answer.events,
            None => Vec::new(),
        }
    }
}

impl fmt::Display for LlmOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LlmOracle(model={}, endpoint={}, timeout={}ms, auth={})",
            self.model,
            self.endpoint,
            self.timeout.as_millis(),
            self.api_key.is_some(),
        )
    }
}

/// Models sometimes wrap JSON in a markdown fence despite the format hint.
fn strip_code_fence(s: &str) -> &str {
    let t = s.trim();
    let t = t.strip_prefix("```json").or_else(|| t.strip_prefix("```")).unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_unwrapped() {
        assert_eq!(strip_code_fence("```json\n{\"region\": null}\n```"), "{\"region\": null}");
        assert_eq!(strip_code_fence(" {\"events\": []} "), "{\"events\": []}");
    }

    #[test]
    fn parse_answer_tolerates_missing_fields() {
        let answer: ParseAnswer =
            serde_json::from_str(r#"{"events": [{"city": "Суми", "type": "Drone"}, {}]}"#).unwrap();
        assert_eq!(answer.events.len(), 2);
        assert_eq!(answer.events[0].city.as_deref(), Some("Суми"));
        assert_eq!(answer.events[0].kind.as_deref(), Some("Drone"));
        assert_eq!(answer.events[1], OracleEvent::default());
    }

    #[test]
    fn region_answer_accepts_null() {
        let answer: RegionAnswer = serde_json::from_str(r#"{"region": null}"#).unwrap();
        assert!(answer.region.is_none());
    }
}
