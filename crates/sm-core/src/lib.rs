//! # sm-core
//!
//! The central domain logic and interface definitions for the
//! astro-companion backend: models, port traits, the astro profile
//! generator, the persona prompt builder, and the chat-turn coordinator.

pub mod astro;
pub mod chat;
pub mod error;
pub mod models;
pub mod prompt;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use traits::*;
