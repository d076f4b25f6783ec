//! # sm-ai-gemini
//!
//! Google Gemini implementation of `GenerativeBackend`. The model is asked
//! for structured JSON (reply text, score delta, internal thought, status
//! label) via `responseMimeType` + `responseSchema`, so parsing failures are
//! the exception rather than the norm.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sm_core::models::{ChatMessage, MessageRole};
use sm_core::traits::{AiFailure, GenerativeBackend, PersonaReply};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_p: f64,
    max_output_tokens: u32,
    response_mime_type: String,
    response_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

/// The JSON document the model is instructed to emit.
#[derive(Debug, Deserialize)]
struct RawReply {
    reply_text: String,
    score_change: i64,
    #[serde(default)]
    internal_thought: String,
    #[serde(default = "default_status")]
    status_label: String,
}

fn default_status() -> String {
    "Neutral".to_string()
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "reply_text": { "type": "STRING" },
            "score_change": { "type": "INTEGER" },
            "internal_thought": { "type": "STRING" },
            "status_label": { "type": "STRING" }
        },
        "required": ["reply_text", "score_change", "internal_thought", "status_label"]
    })
}

fn safety_settings() -> Vec<SafetySetting> {
    vec![
        SafetySetting {
            category: "HARM_CATEGORY_HATE_SPEECH",
            threshold: "BLOCK_ONLY_HIGH",
        },
        SafetySetting {
            category: "HARM_CATEGORY_HARASSMENT",
            threshold: "BLOCK_ONLY_HIGH",
        },
        SafetySetting {
            category: "HARM_CATEGORY_DANGEROUS_CONTENT",
            threshold: "BLOCK_ONLY_HIGH",
        },
        SafetySetting {
            category: "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            threshold: "BLOCK_MEDIUM_AND_ABOVE",
        },
    ]
}

/// Gemini speaks "user"/"model", not "user"/"assistant".
fn wire_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "model",
    }
}

/// Parses the model's structured output into a [`PersonaReply`], clamping the
/// score delta to the contract range. The schema makes fenced output rare,
/// but some model versions still wrap JSON in markdown fences.
pub fn parse_reply(text: &str) -> Result<PersonaReply, AiFailure> {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let raw: RawReply = serde_json::from_str(trimmed)
        .map_err(|e| AiFailure::MalformedOutput(format!("{e}: {trimmed}")))?;
    Ok(PersonaReply {
        reply_text: raw.reply_text,
        score_change: raw.score_change.clamp(-10, 10),
        internal_thought: raw.internal_thought,
        status_label: raw.status_label,
    })
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn build_request(&self, system_prompt: &str, turns: &[ChatMessage]) -> GenerateContentRequest {
        let contents = turns
            .iter()
            .map(|msg| Content {
                role: Some(wire_role(msg.role).to_string()),
                parts: vec![Part {
                    text: msg.content.clone(),
                }],
            })
            .collect();
        GenerateContentRequest {
            contents,
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: 0.9,
                top_p: 0.95,
                max_output_tokens: 500,
                response_mime_type: "application/json".to_string(),
                response_schema: response_schema(),
            },
            safety_settings: safety_settings(),
        }
    }
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[ChatMessage],
    ) -> Result<PersonaReply, AiFailure> {
        if self.api_key.is_empty() {
            return Err(AiFailure::Configuration("GEMINI_API_KEY is not set".into()));
        }

        let url = format!(
            "{API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let request = self.build_request(system_prompt, turns);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiFailure::Timeout
                } else {
                    AiFailure::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            log::warn!("gemini returned {status}: {message}");
            return Err(AiFailure::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AiFailure::MalformedOutput(e.to_string()))?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<String>()
            })
            .ok_or_else(|| AiFailure::MalformedOutput("no candidates in response".into()))?;

        parse_reply(&text)
    }
}
