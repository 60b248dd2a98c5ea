//! Signed buyer session cookie.
//!
//! The cookie holds an HS256 token whose subject is the user id. Nothing else
//! about the user is trusted from the client; handlers reload the user row.

use std::sync::Arc;

use axum_extra::extract::cookie::Cookie;
use jwt_simple::prelude::*;

use crate::error::{AppError, Result};

pub const SESSION_COOKIE: &str = "marketplace_session";

const SESSION_DAYS: u64 = 30;

#[derive(Clone)]
pub struct SessionKeys {
    key: Arc<HS256Key>,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            key: Arc::new(HS256Key::from_bytes(secret.as_bytes())),
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String> {
        let claims = Claims::create(Duration::from_days(SESSION_DAYS)).with_subject(user_id);
        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign session: {}", e)))
    }

    /// Returns the user id for a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<String> {
        match self.key.verify_token::<NoCustomClaims>(token, None) {
            Ok(claims) => claims.subject,
            Err(e) => {
                tracing::debug!("Rejected session token: {}", e);
                None
            }
        }
    }

    /// Build the `Set-Cookie` value that signs `user_id` in.
    pub fn cookie(&self, user_id: &str) -> Result<Cookie<'static>> {
        let token = self.issue(user_id)?;
        let max_age = SESSION_DAYS * 24 * 60 * 60;
        Cookie::parse(format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE, token, max_age
        ))
        .map_err(|e| AppError::Internal(format!("Failed to build session cookie: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify_to_their_subject() {
        let keys = SessionKeys::new("unit-test-secret");
        let token = keys.issue("user-1").unwrap();
        assert_eq!(keys.verify(&token).as_deref(), Some("user-1"));
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let token = SessionKeys::new("one").issue("user-1").unwrap();
        assert!(SessionKeys::new("two").verify(&token).is_none());
        assert!(SessionKeys::new("one").verify("not-a-token").is_none());
    }

    #[test]
    fn cookie_carries_token_and_lifetime() {
        let keys = SessionKeys::new("unit-test-secret");
        let cookie = keys.cookie("user-1").unwrap();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(keys.verify(cookie.value()).as_deref(), Some("user-1"));
    }
}
