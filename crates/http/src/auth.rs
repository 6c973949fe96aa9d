//! Request extractor that gates handlers behind a verified bearer token.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use catalog_authz::{Principal, TokenVerifier};

use crate::error::AppError;

/// Extracting this type rejects the request with 401 unless it carries a
/// valid `Authorization: Bearer <jwt>` header. Handlers that take it never
/// run for anonymous callers.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated(pub Principal);

impl<S> FromRequestParts<S> for Authenticated
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<TokenVerifier>::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .map(|value| value.to_str())
            .transpose()
            .map_err(|_| AppError::unauthorized("authorization header is not valid text"))?;

        match verifier.verify_header(header) {
            Ok(principal) => Ok(Authenticated(principal)),
            Err(err) => {
                tracing::debug!(error = %err, path = %parts.uri.path(), "bearer token rejected");
                Err(AppError::unauthorized(err.to_string()))
            }
        }
    }
}
