//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BirthData, ChatMessage, ChatSession, Character, NatalChart, User};

/// Everything a single chat turn writes, applied atomically by
/// [`CompanionRepo::commit_turn`].
#[derive(Debug, Clone)]
pub struct TurnWrite {
    pub character_id: Uuid,
    pub session_id: Uuid,
    /// Appended to the session history together with `assistant_message`;
    /// the pair shares one timestamp.
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
    /// Already clamped to [-10, 10] by the generative client.
    pub score_change: i64,
    pub status_label: String,
}

/// Data persistence contract for users, characters, and chat sessions.
#[async_trait]
pub trait CompanionRepo: Send + Sync {
    // User operations
    async fn create_user(&self, user: User) -> anyhow::Result<()>;
    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    // Character operations
    async fn create_character(&self, character: Character) -> anyhow::Result<()>;
    async fn get_character(&self, id: Uuid) -> anyhow::Result<Option<Character>>;
    async fn list_characters(&self, user_id: Uuid) -> anyhow::Result<Vec<Character>>;
    /// Deletes the character and all of its sessions in one transaction.
    async fn delete_character(&self, id: Uuid) -> anyhow::Result<()>;

    // Session operations
    async fn create_session(&self, session: ChatSession) -> anyhow::Result<()>;
    async fn get_session(&self, id: Uuid) -> anyhow::Result<Option<ChatSession>>;
    /// Sessions across all of a user's characters, newest activity first,
    /// optionally narrowed to one character.
    async fn list_sessions(
        &self,
        user_id: Uuid,
        character_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<ChatSession>>;
    async fn delete_session(&self, id: Uuid) -> anyhow::Result<()>;

    /// Applies one chat turn: re-reads the character's score under an
    /// exclusive lock, stores `clamp_score(score + score_change)` along with
    /// the status label, and appends both history entries, all in a single
    /// transaction. Returns the new relationship score.
    ///
    /// Two concurrent turns against the same character MUST serialize here;
    /// a lost update is a correctness bug, not a tolerable race.
    async fn commit_turn(&self, turn: TurnWrite) -> anyhow::Result<i64>;
}

/// Credential and bearer-token contract.
pub trait AuthProvider: Send + Sync {
    /// One-way salted hash suitable for storage.
    fn hash_password(&self, password: &str) -> anyhow::Result<String>;

    /// Verifies a plain password against a stored hash.
    fn verify_password(&self, password: &str, hash: &str) -> bool;

    /// Issues an expiring bearer token for the given user.
    fn issue_token(&self, user_id: Uuid) -> anyhow::Result<String>;

    /// Returns the caller's user id for a valid, unexpired token.
    fn verify_token(&self, token: &str) -> Option<Uuid>;
}

/// Structured persona reply from the generative backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaReply {
    pub reply_text: String,
    /// Always within [-10, 10].
    pub score_change: i64,
    /// Private in-character rationale; only surfaced to premium users.
    pub internal_thought: String,
    pub status_label: String,
}

impl PersonaReply {
    /// Neutral reply substituted when the backend fails. The turn still
    /// persists; the user gets a harmless non-answer instead of an error.
    pub fn fallback() -> Self {
        Self {
            reply_text: "...".to_string(),
            score_change: 0,
            internal_thought: String::new(),
            status_label: "Distracted".to_string(),
        }
    }
}

/// Why a generative call failed. Typed so callers and tests can tell
/// "model returned garbage" from "network down" without parsing log text.
#[derive(Debug, Error)]
pub enum AiFailure {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("backend rejected the request ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("malformed structured output: {0}")]
    MalformedOutput(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl AiFailure {
    /// Stable label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            AiFailure::Timeout => "timeout",
            AiFailure::Network(_) => "network",
            AiFailure::Upstream { .. } => "upstream",
            AiFailure::MalformedOutput(_) => "malformed_output",
            AiFailure::Configuration(_) => "configuration",
        }
    }
}

/// Generative model contract. One outbound network call per invocation;
/// no local state mutation (persistence belongs to the coordinator).
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// `turns` is the bounded conversation context, oldest first, with the
    /// current user message as the final entry.
    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[ChatMessage],
    ) -> std::result::Result<PersonaReply, AiFailure>;
}

/// Planetary placement contract. Pure computation; implementations may call
/// a native ephemeris library.
pub trait Ephemeris: Send + Sync {
    fn natal_chart(&self, birth: &BirthData) -> anyhow::Result<NatalChart>;
}
