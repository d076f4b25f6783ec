//! # Relationship State Coordinator
//!
//! Orchestrates one chat turn end-to-end:
//! `RESOLVE_CHARACTER → RESOLVE_SESSION → GENERATE → LOCK_AND_APPLY → PERSIST`.
//!
//! The expensive GENERATE phase runs outside any lock; only the short
//! read-modify-write of the relationship score is serialized, inside
//! [`CompanionRepo::commit_turn`]. Turns against different characters never
//! contend.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use uuid::Uuid;

use crate::astro;
use crate::error::AppError;
use crate::models::{BirthData, ChatMessage, ChatSession, MessageRole};
use crate::prompt;
use crate::traits::{CompanionRepo, Ephemeris, GenerativeBackend, PersonaReply, TurnWrite};

/// Most recent history entries forwarded to the generative backend.
pub const HISTORY_WINDOW: usize = 15;

/// Session titles derive from the first message, truncated at this many chars.
pub const TITLE_MAX_CHARS: usize = 50;

/// Clamps a relationship score into the 0..=100 invariant. Every writer of
/// `relationship_score` must go through this.
pub fn clamp_score(score: i64) -> i64 {
    score.clamp(0, 100)
}

/// Derives a session title from its first message.
pub fn session_title(message: &str) -> String {
    if message.chars().count() > TITLE_MAX_CHARS {
        let truncated: String = message.chars().take(TITLE_MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        message.to_string()
    }
}

/// Age in full years for a birth date, or `None` for structurally invalid
/// input or a date in the future. Never fails a turn.
pub fn compute_age(birth: &BirthData) -> Option<i64> {
    compute_age_at(birth, Utc::now().date_naive())
}

pub fn compute_age_at(birth: &BirthData, today: NaiveDate) -> Option<i64> {
    if birth.year <= 0 || !(1..=12).contains(&birth.month) || !(1..=31).contains(&birth.day) {
        return None;
    }
    let birthdate = NaiveDate::from_ymd_opt(birth.year, birth.month, birth.day)?;
    if birthdate > today {
        return None;
    }
    let mut age = i64::from(today.year() - birthdate.year());
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        age -= 1;
    }
    (age >= 0).then_some(age)
}

/// One inbound chat request, already authenticated.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: Uuid,
    pub character_id: Uuid,
    pub session_id: Option<Uuid>,
    pub message: String,
}

/// Everything the caller gets back from a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: Uuid,
    pub character_id: Uuid,
    pub user_message: String,
    pub reply_text: String,
    pub relationship_score: i64,
    pub current_status: String,
    pub score_change: i64,
    /// Present only for premium callers.
    pub internal_thought: Option<String>,
}

/// The coordinator. Explicitly constructed with its collaborators;
/// no global state, so tests can inject fakes.
pub struct ChatService {
    repo: Arc<dyn CompanionRepo>,
    backend: Arc<dyn GenerativeBackend>,
    ephemeris: Arc<dyn Ephemeris>,
}

impl ChatService {
    pub fn new(
        repo: Arc<dyn CompanionRepo>,
        backend: Arc<dyn GenerativeBackend>,
        ephemeris: Arc<dyn Ephemeris>,
    ) -> Self {
        Self {
            repo,
            backend,
            ephemeris,
        }
    }

    /// Runs one chat turn. See the module docs for the phase breakdown.
    pub async fn run_turn(&self, req: TurnRequest) -> Result<TurnOutcome, AppError> {
        if req.message.trim().is_empty() {
            return Err(AppError::ValidationError("message must not be empty".into()));
        }

        // RESOLVE_CHARACTER. Missing and foreign are the same error, so
        // callers cannot probe for other users' characters.
        let character = self
            .repo
            .get_character(req.character_id)
            .await
            .map_err(internal)?
            .filter(|c| c.user_id == req.user_id)
            .ok_or_else(|| AppError::NotFound("character".into()))?;

        // RESOLVE_SESSION. A supplied id that fails verification falls
        // through to lazy creation rather than erroring.
        let session = match req.session_id {
            Some(id) => self
                .repo
                .get_session(id)
                .await
                .map_err(internal)?
                .filter(|s| s.character_id == character.id),
            None => None,
        };
        let session = match session {
            Some(session) => session,
            None => {
                // Persisted immediately so the id is stable even if
                // generation later fails.
                let session = ChatSession::new(character.id, session_title(&req.message));
                self.repo
                    .create_session(session.clone())
                    .await
                    .map_err(internal)?;
                session
            }
        };

        // GENERATE. The prompt is rebuilt from the *current* score every turn;
        // a cached prompt would pin the persona to a stale relationship band.
        let age = compute_age(&character.birth_data);
        let profile =
            astro::generate_profile(self.ephemeris.as_ref(), &character.birth_data, character.gender);
        let system_prompt = prompt::build_system_prompt(
            &character.name,
            character.gender,
            Some(&profile),
            age,
            character.relationship_score,
        );

        let window_start = session.history.len().saturating_sub(HISTORY_WINDOW);
        let mut turns: Vec<ChatMessage> = session.history[window_start..].to_vec();
        turns.push(ChatMessage {
            role: MessageRole::User,
            content: req.message.clone(),
            timestamp: Utc::now(),
        });

        let reply = match self.backend.generate(&system_prompt, &turns).await {
            Ok(reply) => reply,
            Err(failure) => {
                log::warn!(
                    "generation failed for character '{}' (category: {}): {failure}",
                    character.name,
                    failure.category()
                );
                PersonaReply::fallback()
            }
        };

        // LOCK_AND_APPLY + PERSIST: one transaction in the repo. The pair
        // of history entries shares a single timestamp.
        let timestamp = Utc::now();
        let new_score = self
            .repo
            .commit_turn(TurnWrite {
                character_id: character.id,
                session_id: session.id,
                user_message: ChatMessage {
                    role: MessageRole::User,
                    content: req.message.clone(),
                    timestamp,
                },
                assistant_message: ChatMessage {
                    role: MessageRole::Assistant,
                    content: reply.reply_text.clone(),
                    timestamp,
                },
                score_change: reply.score_change,
                status_label: reply.status_label.clone(),
            })
            .await
            .map_err(internal)?;

        let is_premium = self
            .repo
            .get_user(req.user_id)
            .await
            .map_err(internal)?
            .is_some_and(|u| u.is_premium);

        Ok(TurnOutcome {
            session_id: session.id,
            character_id: character.id,
            user_message: req.message,
            reply_text: reply.reply_text,
            relationship_score: new_score,
            current_status: reply.status_label,
            score_change: reply.score_change,
            internal_thought: is_premium.then_some(reply.internal_thought),
        })
    }
}

fn internal(err: anyhow::Error) -> AppError {
    log::error!("persistence failure: {err:#}");
    AppError::Internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Character, Gender, NatalChart, User, ZodiacSign};
    use crate::traits::AiFailure;
    use async_trait::async_trait;
    use std::sync::Mutex;

    // ── Fakes ────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeRepo {
        users: Mutex<Vec<User>>,
        characters: Mutex<Vec<Character>>,
        sessions: Mutex<Vec<ChatSession>>,
    }

    #[async_trait]
    impl CompanionRepo for FakeRepo {
        async fn create_user(&self, user: User) -> anyhow::Result<()> {
            self.users.lock().unwrap().push(user);
            Ok(())
        }
        async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
        }
        async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            Ok(self.users.lock().unwrap().iter().find(|u| u.email == email).cloned())
        }
        async fn create_character(&self, character: Character) -> anyhow::Result<()> {
            self.characters.lock().unwrap().push(character);
            Ok(())
        }
        async fn get_character(&self, id: Uuid) -> anyhow::Result<Option<Character>> {
            Ok(self.characters.lock().unwrap().iter().find(|c| c.id == id).cloned())
        }
        async fn list_characters(&self, user_id: Uuid) -> anyhow::Result<Vec<Character>> {
            Ok(self
                .characters
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect())
        }
        async fn delete_character(&self, id: Uuid) -> anyhow::Result<()> {
            self.sessions.lock().unwrap().retain(|s| s.character_id != id);
            self.characters.lock().unwrap().retain(|c| c.id != id);
            Ok(())
        }
        async fn create_session(&self, session: ChatSession) -> anyhow::Result<()> {
            self.sessions.lock().unwrap().push(session);
            Ok(())
        }
        async fn get_session(&self, id: Uuid) -> anyhow::Result<Option<ChatSession>> {
            Ok(self.sessions.lock().unwrap().iter().find(|s| s.id == id).cloned())
        }
        async fn list_sessions(
            &self,
            user_id: Uuid,
            character_id: Option<Uuid>,
        ) -> anyhow::Result<Vec<ChatSession>> {
            let owned: Vec<Uuid> = self
                .characters
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.user_id == user_id)
                .map(|c| c.id)
                .collect();
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .filter(|s| owned.contains(&s.character_id))
                .filter(|s| character_id.map_or(true, |id| s.character_id == id))
                .cloned()
                .collect())
        }
        async fn delete_session(&self, id: Uuid) -> anyhow::Result<()> {
            self.sessions.lock().unwrap().retain(|s| s.id != id);
            Ok(())
        }
        async fn commit_turn(&self, turn: TurnWrite) -> anyhow::Result<i64> {
            let mut characters = self.characters.lock().unwrap();
            let character = characters
                .iter_mut()
                .find(|c| c.id == turn.character_id)
                .ok_or_else(|| anyhow::anyhow!("character vanished"))?;
            character.relationship_score = clamp_score(character.relationship_score + turn.score_change);
            character.current_status = turn.status_label.clone();
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .iter_mut()
                .find(|s| s.id == turn.session_id)
                .ok_or_else(|| anyhow::anyhow!("session vanished"))?;
            session.history.push(turn.user_message.clone());
            session.history.push(turn.assistant_message.clone());
            Ok(character.relationship_score)
        }
    }

    struct ScriptedBackend(Result<PersonaReply, ()>);

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn generate(
            &self,
            _system_prompt: &str,
            _turns: &[ChatMessage],
        ) -> Result<PersonaReply, AiFailure> {
            match &self.0 {
                Ok(reply) => Ok(reply.clone()),
                Err(()) => Err(AiFailure::Timeout),
            }
        }
    }

    struct FixedEphemeris;
    impl Ephemeris for FixedEphemeris {
        fn natal_chart(&self, _birth: &BirthData) -> anyhow::Result<NatalChart> {
            Ok(NatalChart {
                sun: ZodiacSign::Leo,
                moon: ZodiacSign::Cancer,
                mercury: ZodiacSign::Virgo,
                venus: ZodiacSign::Leo,
                mars: ZodiacSign::Aries,
            })
        }
    }

    fn seed(repo: &FakeRepo, premium: bool) -> (User, Character) {
        let mut user = User::new("a@b.c".into(), "hash".into());
        user.is_premium = premium;
        let character = Character::new(
            user.id,
            "Kai".into(),
            Gender::Male,
            BirthData::default(),
            None,
        );
        repo.users.lock().unwrap().push(user.clone());
        repo.characters.lock().unwrap().push(character.clone());
        (user, character)
    }

    fn service(repo: Arc<FakeRepo>, backend: ScriptedBackend) -> ChatService {
        ChatService::new(repo, Arc::new(backend), Arc::new(FixedEphemeris))
    }

    fn reply(score_change: i64, status: &str) -> PersonaReply {
        PersonaReply {
            reply_text: "hey yourself".into(),
            score_change,
            internal_thought: "they opened strong".into(),
            status_label: status.into(),
        }
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[test]
    fn clamp_bounds_and_reversibility() {
        for s in 0..=100 {
            for d in -10..=10 {
                let clamped = clamp_score(s + d);
                assert!((0..=100).contains(&clamped));
                // In-range moves are reversible.
                if (0..=100).contains(&(s + d)) {
                    assert_eq!(clamp_score(clamped - d), s);
                }
            }
        }
        assert_eq!(clamp_score(105), 100);
        assert_eq!(clamp_score(-5), 0);
    }

    #[test]
    fn title_truncated_at_fifty_chars() {
        assert_eq!(session_title("hey"), "hey");
        let long = "x".repeat(60);
        let title = session_title(&long);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
        // Exactly 50 stays untouched.
        assert_eq!(session_title(&"y".repeat(50)), "y".repeat(50));
    }

    #[test]
    fn age_rules() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        let birth = |year, month, day| BirthData {
            year,
            month,
            day,
            ..BirthData::default()
        };
        // Birthday already passed this year.
        assert_eq!(compute_age_at(&birth(1990, 6, 15), today), Some(36));
        // Birthday still ahead.
        assert_eq!(compute_age_at(&birth(1990, 12, 1), today), Some(35));
        // Exactly today.
        assert_eq!(compute_age_at(&birth(2000, 8, 23), today), Some(26));
        // Future date.
        assert_eq!(compute_age_at(&birth(2030, 1, 1), today), None);
        // Structurally invalid.
        assert_eq!(compute_age_at(&birth(0, 1, 1), today), None);
        assert_eq!(compute_age_at(&birth(1990, 13, 1), today), None);
        assert_eq!(compute_age_at(&birth(1990, 2, 31), today), None);
    }

    #[tokio::test]
    async fn successful_turn_applies_delta_and_appends_pair() {
        let repo = Arc::new(FakeRepo::default());
        let (user, character) = seed(&repo, false);
        let svc = service(repo.clone(), ScriptedBackend(Ok(reply(-4, "Unimpressed"))));

        let outcome = svc
            .run_turn(TurnRequest {
                user_id: user.id,
                character_id: character.id,
                session_id: None,
                message: "hey".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.relationship_score, 46);
        assert_eq!(outcome.score_change, -4);
        assert_eq!(outcome.current_status, "Unimpressed");
        assert_eq!(outcome.reply_text, "hey yourself");
        assert_eq!(outcome.internal_thought, None);

        let sessions = repo.sessions.lock().unwrap();
        let session = sessions.iter().find(|s| s.id == outcome.session_id).unwrap();
        assert_eq!(session.title, "hey");
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, MessageRole::User);
        assert_eq!(session.history[1].role, MessageRole::Assistant);
        assert_eq!(session.history[0].timestamp, session.history[1].timestamp);
    }

    #[tokio::test]
    async fn backend_timeout_falls_back_without_surfacing() {
        let repo = Arc::new(FakeRepo::default());
        let (user, character) = seed(&repo, false);
        let svc = service(repo.clone(), ScriptedBackend(Err(())));

        let outcome = svc
            .run_turn(TurnRequest {
                user_id: user.id,
                character_id: character.id,
                session_id: None,
                message: "you there?".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.reply_text, "...");
        assert_eq!(outcome.score_change, 0);
        assert_eq!(outcome.relationship_score, 50);
        assert_eq!(outcome.current_status, "Distracted");
        // The turn is still persisted.
        let sessions = repo.sessions.lock().unwrap();
        assert_eq!(sessions[0].history.len(), 2);
    }

    #[tokio::test]
    async fn foreign_and_missing_characters_are_indistinguishable() {
        let repo = Arc::new(FakeRepo::default());
        let (_owner, character) = seed(&repo, false);
        let stranger = Uuid::new_v4();
        let svc = service(repo.clone(), ScriptedBackend(Ok(reply(1, "Fine"))));

        let foreign = svc
            .run_turn(TurnRequest {
                user_id: stranger,
                character_id: character.id,
                session_id: None,
                message: "hi".into(),
            })
            .await
            .unwrap_err();
        let missing = svc
            .run_turn(TurnRequest {
                user_id: stranger,
                character_id: Uuid::new_v4(),
                session_id: None,
                message: "hi".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(foreign, AppError::NotFound(_)));
        assert_eq!(foreign.to_string(), missing.to_string());
    }

    #[tokio::test]
    async fn foreign_session_id_gets_a_fresh_session() {
        let repo = Arc::new(FakeRepo::default());
        let (user, character) = seed(&repo, false);
        let other = Character::new(user.id, "Rival".into(), Gender::Male, BirthData::default(), None);
        let foreign_session = ChatSession::new(other.id, "other thread".into());
        repo.characters.lock().unwrap().push(other);
        repo.sessions.lock().unwrap().push(foreign_session.clone());

        let svc = service(repo.clone(), ScriptedBackend(Ok(reply(2, "Amused"))));
        let outcome = svc
            .run_turn(TurnRequest {
                user_id: user.id,
                character_id: character.id,
                session_id: Some(foreign_session.id),
                message: "hello".into(),
            })
            .await
            .unwrap();

        assert_ne!(outcome.session_id, foreign_session.id);
    }

    #[tokio::test]
    async fn premium_caller_sees_internal_thought() {
        let repo = Arc::new(FakeRepo::default());
        let (user, character) = seed(&repo, true);
        let svc = service(repo.clone(), ScriptedBackend(Ok(reply(3, "Intrigued"))));

        let outcome = svc
            .run_turn(TurnRequest {
                user_id: user.id,
                character_id: character.id,
                session_id: None,
                message: "tell me a secret".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.internal_thought.as_deref(), Some("they opened strong"));
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let repo = Arc::new(FakeRepo::default());
        let (user, character) = seed(&repo, false);
        let svc = service(repo.clone(), ScriptedBackend(Ok(reply(0, "Bored"))));

        let err = svc
            .run_turn(TurnRequest {
                user_id: user.id,
                character_id: character.id,
                session_id: None,
                message: "   ".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }
}
