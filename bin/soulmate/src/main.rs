//! # Soulmate Binary
//!
//! The entry point that assembles the application based on compile-time features.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use sm_api::handlers::AppState;
use sm_api::{configure_routes, middleware};
use sm_core::chat::ChatService;

#[cfg(feature = "db-sqlite")]
use sm_db_sqlite::SqliteCompanionRepo;

#[cfg(feature = "auth-jwt")]
use sm_auth_jwt::JwtAuthProvider;

#[cfg(feature = "ai-gemini")]
use sm_ai_gemini::GeminiBackend;

#[cfg(feature = "astro-natal")]
use sm_astro_natal::NatalCalculator;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // 1. Persistence
    #[cfg(feature = "db-sqlite")]
    let repo = Arc::new(
        SqliteCompanionRepo::new(&env_or("DATABASE_URL", "sqlite:soulmate.db"))
            .await
            .expect("Failed to init SQLite"),
    );

    // 2. Credentials and tokens
    #[cfg(feature = "auth-jwt")]
    let auth = Arc::new(JwtAuthProvider::new(
        &std::env::var("SOULMATE_JWT_SECRET").expect("SOULMATE_JWT_SECRET must be set"),
        env_or("SOULMATE_TOKEN_TTL_MINS", "10080")
            .parse()
            .expect("SOULMATE_TOKEN_TTL_MINS must be an integer"),
    ));

    // 3. Generative backend
    #[cfg(feature = "ai-gemini")]
    let backend = Arc::new(
        GeminiBackend::new(
            &env_or("GEMINI_API_KEY", ""),
            &env_or("GEMINI_MODEL", "gemini-1.5-flash"),
            Duration::from_secs(
                env_or("SOULMATE_AI_TIMEOUT_SECS", "30")
                    .parse()
                    .expect("SOULMATE_AI_TIMEOUT_SECS must be an integer"),
            ),
        )
        .expect("Failed to init Gemini client"),
    );

    // 4. Ephemeris
    #[cfg(feature = "astro-natal")]
    let ephemeris = Arc::new(NatalCalculator::new());

    // 5. Wrap in AppState (dynamic dispatch so plugins stay swappable)
    let chat = ChatService::new(repo.clone(), backend.clone(), ephemeris.clone());
    let state = web::Data::new(AppState {
        repo,
        auth,
        ephemeris,
        chat,
    });

    let bind = env_or("SOULMATE_BIND", "127.0.0.1:8080");
    log::info!("🚀 Soulmate backend starting on http://{bind}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::cors_policy())
            .wrap(middleware::standard_middleware())
            .configure(configure_routes)
    })
    .bind(bind)?
    .run()
    .await
}
