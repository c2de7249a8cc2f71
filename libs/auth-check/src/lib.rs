use std::time::SystemTime;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum_extra::extract::CookieJar;

use josekit::jws::HS256;
use josekit::jwt;
use josekit::JoseError;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no bearer token or session cookie in request")]
    MissingToken,
    #[error("signing key rejected: {0}")]
    Key(#[source] JoseError),
    #[error("token signature or format invalid: {0}")]
    InvalidToken(#[source] JoseError),
    #[error("token has expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("token issuer does not match")]
    WrongIssuer,
    #[error("token has no subject")]
    MissingSubject,
    #[error("token subject {0} is not a user id")]
    InvalidSubject(String),
}

/// Fetch the credential from the `Authorization: Bearer` header, or from the
/// `session` cookie when no such header is present.
pub fn extract_token(headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(auth_header) = headers.get(AUTHORIZATION) {
        if let Ok(auth_value) = auth_header.to_str() {
            if let Some(token) = auth_value.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Ok(token.to_string());
                }
            }
        }
    }

    let cookie_jar = CookieJar::from_headers(headers);
    if let Some(cookie) = cookie_jar.get("session") {
        return Ok(cookie.value().to_string());
    }

    Err(AuthError::MissingToken)
}

/// Verifies HS256 signed access tokens against a shared secret.
#[derive(Clone)]
pub struct TokenValidator {
    secret: String,
    issuer: Option<String>,
}

impl TokenValidator {
    pub fn new(secret: impl Into<String>, issuer: Option<String>) -> Self {
        TokenValidator {
            secret: secret.into(),
            issuer,
        }
    }

    /// Validates the token and returns the user id carried in its subject.
    ///
    /// A token must carry an expiry; `nbf` and the issuer are checked when present
    /// (the issuer only when this validator was configured with one).
    pub fn validate(&self, token: &str) -> Result<Uuid, AuthError> {
        let verifier = HS256
            .verifier_from_bytes(self.secret.as_bytes())
            .map_err(AuthError::Key)?;

        let (payload, _) = jwt::decode_with_verifier(token, &verifier).map_err(|err| {
            tracing::warn!("Token verification failed: {}", err);
            AuthError::InvalidToken(err)
        })?;

        let now = SystemTime::now();

        match payload.expires_at() {
            Some(expires_at) if expires_at > now => {}
            _ => return Err(AuthError::Expired),
        }

        if let Some(not_before) = payload.not_before() {
            if not_before > now {
                return Err(AuthError::NotYetValid);
            }
        }

        if let Some(expected) = &self.issuer {
            if payload.issuer() != Some(expected.as_str()) {
                return Err(AuthError::WrongIssuer);
            }
        }

        let subject = payload.subject().ok_or(AuthError::MissingSubject)?;
        let user_id = Uuid::parse_str(subject)
            .map_err(|_| AuthError::InvalidSubject(subject.to_string()))?;

        tracing::debug!("Token verification successful for user: {}", user_id);
        Ok(user_id)
    }
}
