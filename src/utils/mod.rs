//! Project-specific utilities live here.

use catalog_http::error::AppError;
use uuid::Uuid;

/// Parse a path identifier, rejecting anything that is not a UUID with 400.
pub fn parse_id(kind: &str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request(format!("invalid {kind} id '{raw}'")))
}
