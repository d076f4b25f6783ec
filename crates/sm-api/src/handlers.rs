//! # sm-api Handlers
//!
//! This module coordinates the flow between HTTP requests and Core traits.

use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use sm_core::astro;
use sm_core::chat::{compute_age, ChatService, TurnRequest};
use sm_core::error::AppError;
use sm_core::models::{Character, User, DEFAULT_RELATIONSHIP_SCORE};
use sm_core::prompt;
use sm_core::traits::{AuthProvider, CompanionRepo, Ephemeris};

use crate::dto;
use crate::error::{internal, ApiError};

/// State shared across all Actix-web workers.
pub struct AppState {
    pub repo: Arc<dyn CompanionRepo>,
    pub auth: Arc<dyn AuthProvider>,
    pub ephemeris: Arc<dyn Ephemeris>,
    pub chat: ChatService,
}

type HandlerResult = Result<HttpResponse, ApiError>;

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolves the calling user from the `Authorization: Bearer` header.
/// Deactivated accounts authenticate like bad tokens do.
async fn authenticate(data: &AppState, req: &HttpRequest) -> Result<User, ApiError> {
    let token = bearer_token(req)
        .ok_or_else(|| ApiError(AppError::Unauthorized("missing bearer token".into())))?;
    let user_id = data
        .auth
        .verify_token(token)
        .ok_or_else(|| ApiError(AppError::Unauthorized("invalid or expired token".into())))?;
    data.repo
        .get_user(user_id)
        .await
        .map_err(internal)?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError(AppError::Unauthorized("invalid or expired token".into())))
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().body("Companion backend is running. See /health.")
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

pub async fn register(
    data: web::Data<AppState>,
    body: web::Json<dto::RegisterRequest>,
) -> HandlerResult {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::ValidationError("invalid email address".into()).into());
    }
    if body.password.chars().count() < 8 {
        return Err(
            AppError::ValidationError("password must be at least 8 characters".into()).into(),
        );
    }
    if data
        .repo
        .find_user_by_email(&email)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Err(AppError::Conflict("email already registered".into()).into());
    }

    let hash = data.auth.hash_password(&body.password).map_err(internal)?;
    let user = User::new(email, hash);
    data.repo
        .create_user(user.clone())
        .await
        .map_err(internal)?;
    log::info!("registered user {}", user.id);
    Ok(HttpResponse::Created().json(user))
}

pub async fn login(
    data: web::Data<AppState>,
    body: web::Json<dto::LoginRequest>,
) -> HandlerResult {
    // One message for every failure mode, so login cannot be used to
    // enumerate registered emails.
    let rejected = || ApiError(AppError::Unauthorized("incorrect email or password".into()));

    let email = body.email.trim().to_lowercase();
    let user = data
        .repo
        .find_user_by_email(&email)
        .await
        .map_err(internal)?
        .ok_or_else(rejected)?;
    if !user.is_active || !data.auth.verify_password(&body.password, &user.password_hash) {
        return Err(rejected());
    }

    let token = data.auth.issue_token(user.id).map_err(internal)?;
    Ok(HttpResponse::Ok().json(dto::TokenResponse::bearer(token)))
}

pub async fn me(data: web::Data<AppState>, req: HttpRequest) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    Ok(HttpResponse::Ok().json(user))
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

pub async fn create_character(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<dto::CreateCharacterRequest>,
) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::ValidationError("character name must not be empty".into()).into());
    }

    let birth = dto::coerce_birth_data(&body.birth_data, name);
    // The cached prompt is a creation-time snapshot; chat turns rebuild it
    // from the live relationship score anyway.
    let profile = astro::generate_profile(data.ephemeris.as_ref(), &birth, body.gender);
    let system_prompt = prompt::build_system_prompt(
        name,
        body.gender,
        Some(&profile),
        compute_age(&birth),
        DEFAULT_RELATIONSHIP_SCORE,
    );

    let mut character = Character::new(
        user.id,
        name.to_string(),
        body.gender,
        birth,
        Some(system_prompt),
    );
    character.avatar_url = body.avatar_url.clone();
    data.repo
        .create_character(character.clone())
        .await
        .map_err(internal)?;
    log::info!("user {} created character {}", user.id, character.id);
    Ok(HttpResponse::Created().json(character))
}

pub async fn list_characters(data: web::Data<AppState>, req: HttpRequest) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    let characters = data
        .repo
        .list_characters(user.id)
        .await
        .map_err(internal)?;
    Ok(HttpResponse::Ok().json(characters))
}

/// Missing and foreign characters both 404; see [`AppError::NotFound`].
async fn owned_character(
    data: &AppState,
    user: &User,
    character_id: Uuid,
) -> Result<Character, ApiError> {
    data.repo
        .get_character(character_id)
        .await
        .map_err(internal)?
        .filter(|c| c.user_id == user.id)
        .ok_or_else(|| ApiError(AppError::NotFound("character".into())))
}

pub async fn get_character(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    let character = owned_character(&data, &user, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(character))
}

pub async fn delete_character(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    let character = owned_character(&data, &user, path.into_inner()).await?;
    data.repo
        .delete_character(character.id)
        .await
        .map_err(internal)?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

pub async fn chat(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<dto::ChatRequest>,
) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    let body = body.into_inner();
    let outcome = data
        .chat
        .run_turn(TurnRequest {
            user_id: user.id,
            character_id: body.character_id,
            session_id: body.session_id,
            message: body.message,
        })
        .await?;
    Ok(HttpResponse::Ok().json(dto::ChatResponse {
        session_id: outcome.session_id,
        character_id: outcome.character_id,
        user_message: outcome.user_message,
        reply_text: outcome.reply_text,
        relationship_score: outcome.relationship_score,
        current_status: outcome.current_status,
        score_change: outcome.score_change,
        internal_thought: outcome.internal_thought,
    }))
}

pub async fn list_sessions(
    data: web::Data<AppState>,
    req: HttpRequest,
    filter: web::Query<dto::SessionFilter>,
) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    // Filtering by a character you don't own is a 404, not an empty list.
    if let Some(character_id) = filter.character_id {
        owned_character(&data, &user, character_id).await?;
    }
    let sessions = data
        .repo
        .list_sessions(user.id, filter.character_id)
        .await
        .map_err(internal)?;
    Ok(HttpResponse::Ok().json(sessions))
}

async fn owned_session(
    data: &AppState,
    user: &User,
    session_id: Uuid,
) -> Result<sm_core::models::ChatSession, ApiError> {
    let session = data
        .repo
        .get_session(session_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError(AppError::NotFound("session".into())))?;
    // Ownership runs through the owning character.
    data.repo
        .get_character(session.character_id)
        .await
        .map_err(internal)?
        .filter(|c| c.user_id == user.id)
        .ok_or_else(|| ApiError(AppError::NotFound("session".into())))?;
    Ok(session)
}

pub async fn get_session(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    let session = owned_session(&data, &user, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

pub async fn delete_session(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> HandlerResult {
    let user = authenticate(&data, &req).await?;
    let session = owned_session(&data, &user, path.into_inner()).await?;
    data.repo
        .delete_session(session.id)
        .await
        .map_err(internal)?;
    Ok(HttpResponse::NoContent().finish())
}
