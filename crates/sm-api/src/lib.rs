//! # sm-api
//!
//! The HTTP routing and orchestration layer for the companion backend.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;

use actix_web::web;

/// Configures the routes for the companion API.
///
/// Scoped configuration so the main binary can mount the API under a
/// different prefix if needed (e.g., /api/v1/).
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .route("/", web::get().to(handlers::index))
            .route("/health", web::get().to(handlers::health))
            // Accounts
            .route("/auth/register", web::post().to(handlers::register))
            .route("/auth/login", web::post().to(handlers::login))
            .route("/auth/me", web::get().to(handlers::me))
            // Characters
            .route("/characters", web::post().to(handlers::create_character))
            .route("/characters", web::get().to(handlers::list_characters))
            .route("/characters/{id}", web::get().to(handlers::get_character))
            .route(
                "/characters/{id}",
                web::delete().to(handlers::delete_character),
            )
            // Chat
            .route("/chat", web::post().to(handlers::chat))
            .route("/chat/sessions", web::get().to(handlers::list_sessions))
            .route("/chat/sessions/{id}", web::get().to(handlers::get_session))
            .route(
                "/chat/sessions/{id}",
                web::delete().to(handlers::delete_session),
            ),
    );
}
