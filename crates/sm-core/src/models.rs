//! # Domain Models
//!
//! These structs represent the core entities of the companion backend.
//! UUIDs are v4 for globally unique identification; all timestamps are UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered account. Owns zero or more [`Character`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Argon2 PHC string. Immutable outside a (future) password-reset flow.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_active: bool,
    /// Gates `internal_thought` in chat responses.
    pub is_premium: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            is_active: true,
            is_premium: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persona gender. Anything unrecognized deserializes as `Male`, which is
/// also the documented default for missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    #[default]
    #[serde(other)]
    Male,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

/// Validated astrological birth record. Loose client input is coerced into
/// this at the API boundary; everything past that point sees real fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BirthData {
    pub name: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub city: String,
    pub nation: String,
}

impl Default for BirthData {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            year: 1990,
            month: 1,
            day: 1,
            hour: 12,
            minute: 0,
            city: "Moscow".to_string(),
            nation: "RU".to_string(),
        }
    }
}

/// An AI persona owned by exactly one [`User`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub gender: Gender,
    pub birth_data: BirthData,
    /// Persona instruction text derived at creation time and cached.
    pub system_prompt: Option<String>,
    pub avatar_url: Option<String>,
    /// Invariant: 0..=100. Every writer clamps.
    pub relationship_score: i64,
    /// Free-text mood label, last set by a successful (or fallback) turn.
    pub current_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_RELATIONSHIP_SCORE: i64 = 50;

impl Character {
    pub fn new(
        user_id: Uuid,
        name: String,
        gender: Gender,
        birth_data: BirthData,
        system_prompt: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            gender,
            birth_data,
            system_prompt,
            avatar_url: None,
            relationship_score: DEFAULT_RELATIONSHIP_SCORE,
            current_status: "Curious".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Who authored a history entry. The literal role "user" maps through
/// unchanged; any other stored value is treated as the counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    #[serde(other)]
    Assistant,
}

/// One entry in a session's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A conversation thread with one [`Character`]. Created lazily on the
/// first message of a turn that did not name an existing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub character_id: Uuid,
    pub title: String,
    pub history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(character_id: Uuid, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            character_id,
            title,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The twelve tropical zodiac signs, in ecliptic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZodiacSign {
    Aries,
    Taurus,
    Gemini,
    Cancer,
    Leo,
    Virgo,
    Libra,
    Scorpio,
    Sagittarius,
    Capricorn,
    Aquarius,
    Pisces,
}

impl ZodiacSign {
    pub const ALL: [ZodiacSign; 12] = [
        ZodiacSign::Aries,
        ZodiacSign::Taurus,
        ZodiacSign::Gemini,
        ZodiacSign::Cancer,
        ZodiacSign::Leo,
        ZodiacSign::Virgo,
        ZodiacSign::Libra,
        ZodiacSign::Scorpio,
        ZodiacSign::Sagittarius,
        ZodiacSign::Capricorn,
        ZodiacSign::Aquarius,
        ZodiacSign::Pisces,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ZodiacSign::Aries => "Aries",
            ZodiacSign::Taurus => "Taurus",
            ZodiacSign::Gemini => "Gemini",
            ZodiacSign::Cancer => "Cancer",
            ZodiacSign::Leo => "Leo",
            ZodiacSign::Virgo => "Virgo",
            ZodiacSign::Libra => "Libra",
            ZodiacSign::Scorpio => "Scorpio",
            ZodiacSign::Sagittarius => "Sagittarius",
            ZodiacSign::Capricorn => "Capricorn",
            ZodiacSign::Aquarius => "Aquarius",
            ZodiacSign::Pisces => "Pisces",
        }
    }

    /// Sign at a given ecliptic longitude (degrees, any range).
    pub fn from_longitude(degrees: f64) -> Self {
        let normalized = degrees.rem_euclid(360.0);
        let index = (normalized / 30.0) as usize;
        Self::ALL[index.min(11)]
    }
}

/// Planetary sign placements for one birth chart, as returned by an
/// [`crate::traits::Ephemeris`] backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatalChart {
    pub sun: ZodiacSign,
    pub moon: ZodiacSign,
    pub mercury: ZodiacSign,
    pub venus: ZodiacSign,
    pub mars: ZodiacSign,
}
