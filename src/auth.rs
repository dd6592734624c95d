//! Bearer token checks for the article write routes.
//!
//! Tokens are HS256 JWTs issued by the account service, carrying the user's
//! `id`, `email` and `role`. This crate only verifies them.

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: u64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("authentication is not configured")]
    NotConfigured,
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Reads `JWT_SECRET`. `None` when it is unset or blank.
    pub fn from_env() -> Option<Self> {
        std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| Self::new(s.as_bytes()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }

    pub fn verify_headers(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let token = bearer_token(headers).ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub const SECRET: &[u8] = b"test-secret";

    pub fn sign(secret: &[u8], expires_in_secs: i64) -> String {
        let claims = Claims {
            id: "user-1".to_string(),
            email: Some("editor@tuoitre.vn".to_string()),
            role: Some("admin".to_string()),
            exp: (Utc::now().timestamp() + expires_in_secs) as u64,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_valid_token() {
        let verifier = TokenVerifier::new(SECRET);
        let token = sign(SECRET, 3600);

        let claims = verifier
            .verify_headers(&headers(&format!("Bearer {}", token)))
            .unwrap();

        assert_eq!(claims.id, "user-1");
        assert_eq!(claims.role.as_deref(), Some("admin"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        let token = sign(b"other-secret", 3600);

        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        let token = sign(SECRET, -3600);

        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_missing_or_malformed_header() {
        let verifier = TokenVerifier::new(SECRET);

        assert!(matches!(
            verifier.verify_headers(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            verifier.verify_headers(&headers("Basic abc")),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            verifier.verify_headers(&headers("Bearer ")),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("bearer abc.def")), Some("abc.def"));
    }
}
