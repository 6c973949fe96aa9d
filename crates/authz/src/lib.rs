//! Bearer token verification for mutating endpoints.
//!
//! Tokens are HS256 JWTs signed with the shared secret from
//! [`AuthSettings`]. Only the signature, and `exp` when present, are
//! checked; an optional UUID `sub` identifies the calling account.

use catalog_kernel::settings::AuthSettings;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token subject is not an account id")]
    InvalidSubject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    /// Account the token was issued to, when the token names one.
    pub account_id: Option<Uuid>,
}

impl Principal {
    /// Whether this caller may act on behalf of `account_id`.
    ///
    /// Tokens without a subject are service tokens and may act for anyone.
    pub fn may_act_for(&self, account_id: Uuid) -> bool {
        self.account_id.map_or(true, |own| own == account_id)
    }
}

pub struct TokenVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(settings: &AuthSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.leeway = settings.leeway_secs;

        Self {
            decoding: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            encoding: EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
            validation,
        }
    }

    /// Verify the value of an `Authorization` header.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let header = header.ok_or(AuthError::MissingToken)?;
        let mut parts = header.split_whitespace();

        match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                self.verify(token)
            }
            _ => Err(AuthError::MalformedHeader),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)?;

        let account_id = match data.claims.sub.as_deref() {
            None | Some("") => None,
            Some(sub) => Some(Uuid::parse_str(sub).map_err(|_| AuthError::InvalidSubject)?),
        };

        tracing::debug!(target: "catalog-authz", ?account_id, "bearer token accepted");
        Ok(Principal { account_id })
    }

    /// Sign a token, optionally bound to an account and expiring after `ttl_secs`.
    pub fn issue(
        &self,
        account_id: Option<Uuid>,
        ttl_secs: Option<u64>,
    ) -> Result<String, AuthError> {
        let exp = ttl_secs.map(|ttl| {
            let now = time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
            now + ttl
        });
        let claims = Claims {
            sub: account_id.map(|id| id.to_string()),
            exp,
        };

        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding,
        )?)
    }
}
