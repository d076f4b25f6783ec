//! Request and response bodies.
//!
//! Clients send birth data in whatever shape their form library produced:
//! numbers as strings, fields missing, extra keys. All of it is coerced into
//! a fully-populated [`BirthData`] here, at the boundary, so the rest of the
//! stack never sees a partial record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use sm_core::models::{BirthData, Gender};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCharacterRequest {
    pub name: String,
    #[serde(default)]
    pub gender: Gender,
    /// Raw client-supplied birth form; see [`coerce_birth_data`].
    #[serde(default)]
    pub birth_data: Value,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub character_id: Uuid,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub character_id: Uuid,
    pub user_message: String,
    pub reply_text: String,
    pub relationship_score: i64,
    pub current_status: String,
    pub score_change: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_thought: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionFilter {
    #[serde(default)]
    pub character_id: Option<Uuid>,
}

fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Coerces an arbitrary JSON object into a complete [`BirthData`]. Missing
/// or unusable fields take the documented defaults; the character's display
/// name doubles as the chart name when none is given.
pub fn coerce_birth_data(raw: &Value, character_name: &str) -> BirthData {
    let defaults = BirthData::default();
    let get = |key: &str| raw.get(key);
    BirthData {
        name: coerce_string(get("name")).unwrap_or_else(|| character_name.to_string()),
        year: coerce_int(get("year"))
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(defaults.year),
        month: coerce_int(get("month"))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.month),
        day: coerce_int(get("day"))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.day),
        hour: coerce_int(get("hour"))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.hour),
        minute: coerce_int(get("minute"))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.minute),
        city: coerce_string(get("city")).unwrap_or(defaults.city),
        nation: coerce_string(get("nation")).unwrap_or(defaults.nation),
    }
}
