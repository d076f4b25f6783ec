//! # sm-db-sqlite
//!
//! SQLite implementation of `CompanionRepo`. Maps between the relational
//! model and the `sm-core` domain models: UUIDs as BLOBs, JSON columns as
//! TEXT, chrono timestamps.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Connection, Row, SqliteConnection};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use sm_core::chat::clamp_score;
use sm_core::models::{BirthData, ChatMessage, ChatSession, Character, Gender, User};
use sm_core::traits::{CompanionRepo, TurnWrite};

pub struct SqliteCompanionRepo {
    pool: SqlitePool,
}

// Helpers for UUID conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> Uuid {
    Uuid::from_slice(blob).unwrap_or_default()
}

fn gender_from_str(value: &str) -> Gender {
    if value.eq_ignore_ascii_case("female") {
        Gender::Female
    } else {
        Gender::Male
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BLOB PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        is_premium INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS characters (
        id BLOB PRIMARY KEY,
        user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        gender TEXT NOT NULL DEFAULT 'male',
        birth_data TEXT NOT NULL,
        system_prompt TEXT,
        avatar_url TEXT,
        relationship_score INTEGER NOT NULL DEFAULT 50,
        current_status TEXT NOT NULL DEFAULT 'Curious',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_characters_user ON characters(user_id)",
    "CREATE TABLE IF NOT EXISTS chat_sessions (
        id BLOB PRIMARY KEY,
        character_id BLOB NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        history TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sessions_character ON chat_sessions(character_id)",
];

impl SqliteCompanionRepo {
    /// Connects and ensures the schema exists.
    ///
    /// In-memory databases are pinned to a single pooled connection;
    /// each SQLite `:memory:` connection is otherwise its own database.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            // Concurrent BEGIN IMMEDIATE waits instead of failing with BUSY.
            .busy_timeout(Duration::from_secs(5));

        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        log::debug!("sqlite schema ready at {url}");
        Ok(Self { pool })
    }

    fn row_to_user(row: &SqliteRow) -> User {
        User {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            is_active: row.get("is_active"),
            is_premium: row.get("is_premium"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_character(row: &SqliteRow) -> Character {
        Character {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            user_id: blob_to_uuid(row.get::<Vec<u8>, _>("user_id").as_slice()),
            name: row.get("name"),
            gender: gender_from_str(&row.get::<String, _>("gender")),
            birth_data: serde_json::from_str::<BirthData>(&row.get::<String, _>("birth_data"))
                .unwrap_or_default(),
            system_prompt: row.get("system_prompt"),
            avatar_url: row.get("avatar_url"),
            relationship_score: row.get("relationship_score"),
            current_status: row.get("current_status"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_session(row: &SqliteRow) -> ChatSession {
        ChatSession {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            character_id: blob_to_uuid(row.get::<Vec<u8>, _>("character_id").as_slice()),
            title: row.get("title"),
            history: serde_json::from_str::<Vec<ChatMessage>>(&row.get::<String, _>("history"))
                .unwrap_or_default(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// The body of one turn's transaction. Runs with the write lock already
/// held; keep it short. Generation has already happened by now.
async fn apply_turn(conn: &mut SqliteConnection, turn: &TurnWrite) -> anyhow::Result<i64> {
    let row = sqlx::query("SELECT relationship_score FROM characters WHERE id = ?")
        .bind(uuid_to_blob(turn.character_id))
        .fetch_optional(&mut *conn)
        .await?
        .context("character disappeared mid-turn")?;
    let current: i64 = row.get(0);
    let new_score = clamp_score(current + turn.score_change);
    let touched: DateTime<Utc> = turn.user_message.timestamp;

    sqlx::query(
        "UPDATE characters SET relationship_score = ?, current_status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(new_score)
    .bind(&turn.status_label)
    .bind(touched)
    .bind(uuid_to_blob(turn.character_id))
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query("SELECT history FROM chat_sessions WHERE id = ?")
        .bind(uuid_to_blob(turn.session_id))
        .fetch_optional(&mut *conn)
        .await?
        .context("session disappeared mid-turn")?;
    let mut history: Vec<ChatMessage> =
        serde_json::from_str(&row.get::<String, _>(0)).unwrap_or_default();
    history.push(turn.user_message.clone());
    history.push(turn.assistant_message.clone());

    sqlx::query("UPDATE chat_sessions SET history = ?, updated_at = ? WHERE id = ?")
        .bind(serde_json::to_string(&history)?)
        .bind(touched)
        .bind(uuid_to_blob(turn.session_id))
        .execute(&mut *conn)
        .await?;

    Ok(new_score)
}

#[async_trait]
impl CompanionRepo for SqliteCompanionRepo {
    async fn create_user(&self, user: User) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, is_active, is_premium, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(user.id))
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.is_active)
        .bind(user.is_premium)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn create_character(&self, character: Character) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO characters (id, user_id, name, gender, birth_data, system_prompt,
             avatar_url, relationship_score, current_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(character.id))
        .bind(uuid_to_blob(character.user_id))
        .bind(character.name)
        .bind(character.gender.to_string())
        .bind(serde_json::to_string(&character.birth_data)?)
        .bind(character.system_prompt)
        .bind(character.avatar_url)
        .bind(character.relationship_score)
        .bind(character.current_status)
        .bind(character.created_at)
        .bind(character.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_character(&self, id: Uuid) -> anyhow::Result<Option<Character>> {
        let row = sqlx::query("SELECT * FROM characters WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_character))
    }

    async fn list_characters(&self, user_id: Uuid) -> anyhow::Result<Vec<Character>> {
        let rows = sqlx::query("SELECT * FROM characters WHERE user_id = ? ORDER BY created_at DESC")
            .bind(uuid_to_blob(user_id))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_character).collect())
    }

    /// Removes the character and its sessions in one transaction, no
    /// orphaned sessions if the second delete fails.
    async fn delete_character(&self, id: Uuid) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chat_sessions WHERE character_id = ?")
            .bind(uuid_to_blob(id))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM characters WHERE id = ?")
            .bind(uuid_to_blob(id))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_session(&self, session: ChatSession) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO chat_sessions (id, character_id, title, history, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(session.id))
        .bind(uuid_to_blob(session.character_id))
        .bind(session.title)
        .bind(serde_json::to_string(&session.history)?)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> anyhow::Result<Option<ChatSession>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_session))
    }

    async fn list_sessions(
        &self,
        user_id: Uuid,
        character_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<ChatSession>> {
        let rows = match character_id {
            Some(character_id) => {
                sqlx::query(
                    "SELECT s.* FROM chat_sessions s
                     JOIN characters c ON c.id = s.character_id
                     WHERE c.user_id = ? AND s.character_id = ?
                     ORDER BY s.updated_at DESC",
                )
                .bind(uuid_to_blob(user_id))
                .bind(uuid_to_blob(character_id))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT s.* FROM chat_sessions s
                     JOIN characters c ON c.id = s.character_id
                     WHERE c.user_id = ?
                     ORDER BY s.updated_at DESC",
                )
                .bind(uuid_to_blob(user_id))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(Self::row_to_session).collect())
    }

    async fn delete_session(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(uuid_to_blob(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// SQLite has no `SELECT ... FOR UPDATE`; `BEGIN IMMEDIATE` takes the
    /// write lock before the read, which serializes concurrent turns
    /// against the same character and rules out lost score updates.
    async fn commit_turn(&self, turn: TurnWrite) -> anyhow::Result<i64> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let outcome = match apply_turn(&mut conn, &turn).await {
            Ok(new_score) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| new_score)
                .map_err(|err| anyhow::Error::new(err).context("turn commit failed")),
            Err(err) => Err(err),
        };

        // On any failure the transaction may still be open, and the pool
        // reuses this connection as-is. Roll back before it goes back; a
        // connection that cannot roll back must be closed instead, or every
        // later turn routed to it fails with a nested BEGIN.
        if outcome.is_err() {
            if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                log::error!("rollback after failed turn also failed: {rollback_err}");
                if let Err(close_err) = conn.detach().close().await {
                    log::warn!("could not close broken connection: {close_err}");
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sm_core::models::MessageRole;

    async fn repo() -> SqliteCompanionRepo {
        SqliteCompanionRepo::new("sqlite::memory:").await.unwrap()
    }

    async fn seed_user(repo: &SqliteCompanionRepo) -> User {
        let user = User::new(format!("{}@test.io", Uuid::new_v4()), "hash".into());
        repo.create_user(user.clone()).await.unwrap();
        user
    }

    async fn seed_character(repo: &SqliteCompanionRepo, user: &User) -> Character {
        let character = Character::new(
            user.id,
            "Kai".into(),
            Gender::Female,
            BirthData {
                name: "Kai".into(),
                year: 1993,
                month: 6,
                day: 15,
                ..BirthData::default()
            },
            Some("system prompt".into()),
        );
        repo.create_character(character.clone()).await.unwrap();
        character
    }

    fn turn(character_id: Uuid, session_id: Uuid, delta: i64, status: &str) -> TurnWrite {
        let timestamp = Utc::now();
        TurnWrite {
            character_id,
            session_id,
            user_message: ChatMessage {
                role: MessageRole::User,
                content: "hey".into(),
                timestamp,
            },
            assistant_message: ChatMessage {
                role: MessageRole::Assistant,
                content: "hey yourself".into(),
                timestamp,
            },
            score_change: delta,
            status_label: status.into(),
        }
    }

    #[tokio::test]
    async fn user_round_trip_and_unique_email() {
        let repo = repo().await;
        let user = seed_user(&repo).await;

        let by_id = repo.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, user.email);
        assert!(by_id.is_active);
        assert!(!by_id.is_premium);

        let by_email = repo.find_user_by_email(&user.email).await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);

        let duplicate = User::new(user.email.clone(), "other".into());
        assert!(repo.create_user(duplicate).await.is_err());
    }

    #[tokio::test]
    async fn character_round_trip_preserves_birth_data() {
        let repo = repo().await;
        let user = seed_user(&repo).await;
        let character = seed_character(&repo, &user).await;

        let loaded = repo.get_character(character.id).await.unwrap().unwrap();
        assert_eq!(loaded.birth_data, character.birth_data);
        assert_eq!(loaded.gender, Gender::Female);
        assert_eq!(loaded.relationship_score, 50);
        assert_eq!(loaded.current_status, "Curious");
        assert_eq!(loaded.system_prompt.as_deref(), Some("system prompt"));
    }

    #[tokio::test]
    async fn delete_character_removes_its_sessions() {
        let repo = repo().await;
        let user = seed_user(&repo).await;
        let character = seed_character(&repo, &user).await;
        let session = ChatSession::new(character.id, "hello".into());
        repo.create_session(session.clone()).await.unwrap();

        repo.delete_character(character.id).await.unwrap();

        assert!(repo.get_character(character.id).await.unwrap().is_none());
        assert!(repo.get_session(session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_sessions_scopes_to_owner_and_filter() {
        let repo = repo().await;
        let alice = seed_user(&repo).await;
        let bob = seed_user(&repo).await;
        let alices = seed_character(&repo, &alice).await;
        let bobs = seed_character(&repo, &bob).await;
        repo.create_session(ChatSession::new(alices.id, "a".into())).await.unwrap();
        repo.create_session(ChatSession::new(bobs.id, "b".into())).await.unwrap();

        let for_alice = repo.list_sessions(alice.id, None).await.unwrap();
        assert_eq!(for_alice.len(), 1);
        assert_eq!(for_alice[0].character_id, alices.id);

        // Filtering by someone else's character yields nothing.
        let cross = repo.list_sessions(alice.id, Some(bobs.id)).await.unwrap();
        assert!(cross.is_empty());
    }

    #[tokio::test]
    async fn commit_turn_applies_example_exchange() {
        let repo = repo().await;
        let user = seed_user(&repo).await;
        let character = seed_character(&repo, &user).await;
        let session = ChatSession::new(character.id, "hey".into());
        repo.create_session(session.clone()).await.unwrap();

        let new_score = repo
            .commit_turn(turn(character.id, session.id, -4, "Unimpressed"))
            .await
            .unwrap();
        assert_eq!(new_score, 46);

        let character = repo.get_character(character.id).await.unwrap().unwrap();
        assert_eq!(character.relationship_score, 46);
        assert_eq!(character.current_status, "Unimpressed");

        let session = repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, MessageRole::User);
        assert_eq!(session.history[1].role, MessageRole::Assistant);
        assert_eq!(session.history[0].timestamp, session.history[1].timestamp);
    }

    #[tokio::test]
    async fn commit_turn_clamps_at_bounds() {
        let repo = repo().await;
        let user = seed_user(&repo).await;
        let character = seed_character(&repo, &user).await;
        let session = ChatSession::new(character.id, "hey".into());
        repo.create_session(session.clone()).await.unwrap();

        // Six turns of -10 from 50 cannot go below zero.
        for _ in 0..6 {
            repo.commit_turn(turn(character.id, session.id, -10, "Cold"))
                .await
                .unwrap();
        }
        let character = repo.get_character(character.id).await.unwrap().unwrap();
        assert_eq!(character.relationship_score, 0);
    }

    #[tokio::test]
    async fn failed_turn_rolls_back_entirely() {
        let repo = repo().await;
        let user = seed_user(&repo).await;
        let character = seed_character(&repo, &user).await;
        let session = ChatSession::new(character.id, "hey".into());
        repo.create_session(session.clone()).await.unwrap();

        // Bogus session id: the score update must not survive the rollback.
        let result = repo
            .commit_turn(turn(character.id, Uuid::new_v4(), 5, "Warm"))
            .await;
        assert!(result.is_err());

        let character = repo.get_character(character.id).await.unwrap().unwrap();
        assert_eq!(character.relationship_score, 50);
        let session = repo.get_session(session.id).await.unwrap().unwrap();
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn failed_turn_leaves_the_pool_usable() {
        // In-memory pools hold exactly one connection, so a transaction
        // left open by the error path would wedge the very next turn
        // with a nested BEGIN.
        let repo = repo().await;
        let user = seed_user(&repo).await;
        let character = seed_character(&repo, &user).await;
        let session = ChatSession::new(character.id, "hey".into());
        repo.create_session(session.clone()).await.unwrap();

        for _ in 0..3 {
            let failed = repo
                .commit_turn(turn(character.id, Uuid::new_v4(), 5, "Warm"))
                .await;
            assert!(failed.is_err());
            repo.commit_turn(turn(character.id, session.id, 1, "Warm"))
                .await
                .unwrap();
        }
        let character = repo.get_character(character.id).await.unwrap().unwrap();
        assert_eq!(character.relationship_score, 53);
    }

    #[tokio::test]
    async fn concurrent_turns_never_lose_an_update() {
        // A file-backed database gets a multi-connection pool, so the two
        // turns run on separate connections and genuinely contend for the
        // write lock. An in-memory pool would serialize them at acquire
        // and never exercise the locking at all.
        let path = std::env::temp_dir().join(format!("companion-turns-{}.db", Uuid::new_v4()));
        let url = format!("sqlite:{}", path.display());
        let repo = std::sync::Arc::new(SqliteCompanionRepo::new(&url).await.unwrap());

        let user = seed_user(&repo).await;
        let character = seed_character(&repo, &user).await;
        let session = ChatSession::new(character.id, "hey".into());
        repo.create_session(session.clone()).await.unwrap();

        let a = {
            let repo = repo.clone();
            let t = turn(character.id, session.id, 7, "Warm");
            tokio::spawn(async move { repo.commit_turn(t).await })
        };
        let b = {
            let repo = repo.clone();
            let t = turn(character.id, session.id, 9, "Warmer");
            tokio::spawn(async move { repo.commit_turn(t).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // 50 + 7 + 9 regardless of ordering; 57 or 59 alone means a lost update.
        let character = repo.get_character(character.id).await.unwrap().unwrap();
        assert_eq!(character.relationship_score, 66);
        let session = repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.history.len(), 4);

        repo.pool.close().await;
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-journal"));
    }
}
