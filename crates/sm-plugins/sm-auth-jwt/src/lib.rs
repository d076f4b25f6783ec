//! # sm-auth-jwt
//!
//! Argon2 + HS256 implementation of `AuthProvider`: salted one-way password
//! hashes and expiring bearer tokens carrying the user id as `sub`.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sm_core::traits::AuthProvider;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User id.
    sub: String,
    iat: i64,
    exp: i64,
}

pub struct JwtAuthProvider {
    secret: String,
    token_ttl: Duration,
}

impl JwtAuthProvider {
    /// `token_ttl_mins` mirrors the deployment env var; the original
    /// deployment shipped with 7 days.
    pub fn new(secret: &str, token_ttl_mins: i64) -> Self {
        Self {
            secret: secret.to_string(),
            token_ttl: Duration::minutes(token_ttl_mins),
        }
    }
}

impl AuthProvider for JwtAuthProvider {
    fn hash_password(&self, password: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
        Ok(hash.to_string())
    }

    fn verify_password(&self, password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    fn issue_token(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.token_ttl).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Invalid, tampered, or expired tokens all verify to `None`;
    /// callers turn that into a uniform 401.
    fn verify_token(&self, token: &str) -> Option<Uuid> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?;
        Uuid::parse_str(&data.claims.sub).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> JwtAuthProvider {
        JwtAuthProvider::new("test-secret", 60)
    }

    #[test]
    fn password_hash_round_trip() {
        let auth = provider();
        let hash = auth.hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(auth.verify_password("hunter2", &hash));
        assert!(!auth.verify_password("hunter3", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let auth = provider();
        let a = auth.hash_password("hunter2").unwrap();
        let b = auth.hash_password("hunter2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!provider().verify_password("hunter2", "not-a-phc-string"));
    }

    #[test]
    fn token_round_trip() {
        let auth = provider();
        let user_id = Uuid::new_v4();
        let token = auth.issue_token(user_id).unwrap();
        assert_eq!(auth.verify_token(&token), Some(user_id));
    }

    #[test]
    fn tampered_token_rejected() {
        let auth = provider();
        let mut token = auth.issue_token(Uuid::new_v4()).unwrap();
        token.push('x');
        assert_eq!(auth.verify_token(&token), None);
    }

    #[test]
    fn token_from_other_secret_rejected() {
        let token = JwtAuthProvider::new("other-secret", 60)
            .issue_token(Uuid::new_v4())
            .unwrap();
        assert_eq!(provider().verify_token(&token), None);
    }

    #[test]
    fn expired_token_rejected() {
        // Negative TTL produces an already-expired token.
        let auth = JwtAuthProvider::new("test-secret", -120);
        let token = auth.issue_token(Uuid::new_v4()).unwrap();
        assert_eq!(auth.verify_token(&token), None);
    }
}
