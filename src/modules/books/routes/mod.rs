//! HTTP handlers for `/api/v1/book`.

use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use catalog_authz::TokenVerifier;
use catalog_http::{auth::Authenticated, error::AppError, response::Envelope};
use catalog_kernel::CallContext;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::models::{Book, CreateBook, UpdateBook};
use super::policy::VoteDecision;
use super::service::{BookService, VoteOutcome};
use super::store::StoreError;
use crate::utils::parse_id;

#[derive(Clone)]
pub struct BooksState {
    pub service: BookService,
    pub verifier: Arc<TokenVerifier>,
    /// Cancelled when shutdown gives up on draining.
    pub shutdown: CancellationToken,
}

impl BooksState {
    fn call_context(&self) -> CallContext {
        CallContext::child_of(&self.shutdown)
    }
}

impl FromRef<BooksState> for Arc<TokenVerifier> {
    fn from_ref(state: &BooksState) -> Self {
        state.verifier.clone()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::not_found(err.to_string()),
            StoreError::Validation(message) => AppError::validation(vec![], message),
            StoreError::Conflict {
                book_id,
                account_id,
            } => AppError::conflict(
                vec![json!({
                    "retryable": true,
                    "account_id": account_id,
                    "book_id": book_id,
                })],
                "request collided with a concurrent update, retry it",
            ),
            StoreError::Cancelled(_) => AppError::unavailable("request cancelled"),
            StoreError::Database(e) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

pub fn router(state: BooksState) -> Router {
    Router::new()
        .route("/", post(create_book))
        .route(
            "/{id}",
            get(get_book).patch(update_book).delete(delete_book),
        )
        .route("/upvote-count/{id}", get(get_upvote_count))
        .route("/upvote/{account_id}/{id}", patch(upvote_book))
        .route("/downvote/{account_id}/{id}", patch(downvote_book))
        .with_state(state)
}

async fn create_book(
    State(state): State<BooksState>,
    Authenticated(principal): Authenticated,
    Json(request): Json<CreateBook>,
) -> Result<Json<Book>, AppError> {
    let owner = match (principal.account_id, request.account_id) {
        (Some(subject), Some(requested)) if subject != requested => {
            return Err(AppError::forbidden("cannot create books for another account"));
        }
        (Some(subject), _) => subject,
        (None, Some(requested)) => requested,
        (None, None) => {
            return Err(AppError::validation(
                vec![json!({"field": "account_id", "error": "required"})],
                "account_id is required when the token names no account",
            ));
        }
    };

    let book = Book::new(owner, request.title, request.author, request.year);
    let created = state.service.create_book(&state.call_context(), book).await?;
    Ok(Json(created))
}

async fn get_book(
    State(state): State<BooksState>,
    Path(id): Path<String>,
) -> Result<Json<Book>, AppError> {
    let id = parse_id("book", &id)?;
    Ok(Json(state.service.get_book(&state.call_context(), id).await?))
}

// Book edits take any valid token; ownership is not matched.
async fn update_book(
    State(state): State<BooksState>,
    Authenticated(_principal): Authenticated,
    Path(id): Path<String>,
    Json(changes): Json<UpdateBook>,
) -> Result<Json<Book>, AppError> {
    let id = parse_id("book", &id)?;
    let ctx = state.call_context();

    let current = state.service.get_book(&ctx, id).await?;
    let updated = state
        .service
        .update_book(&ctx, changes.apply_to(current))
        .await?;
    Ok(Json(updated))
}

async fn delete_book(
    State(state): State<BooksState>,
    Authenticated(_principal): Authenticated,
    Path(id): Path<String>,
) -> Result<Envelope, AppError> {
    let id = parse_id("book", &id)?;
    state.service.delete_book(&state.call_context(), id).await?;
    Ok(Envelope::ok("Successfully deleted"))
}

async fn get_upvote_count(
    State(state): State<BooksState>,
    Path(id): Path<String>,
) -> Result<Envelope, AppError> {
    let id = parse_id("book", &id)?;
    let count = state
        .service
        .get_up_vote_count(&state.call_context(), id)
        .await?;
    Ok(Envelope::ok("Upvote count").with_count(count))
}

async fn upvote_book(
    State(state): State<BooksState>,
    Authenticated(principal): Authenticated,
    Path((account_id, id)): Path<(String, String)>,
) -> Result<Envelope, AppError> {
    let (account_id, book_id) = (parse_id("account", &account_id)?, parse_id("book", &id)?);
    if !principal.may_act_for(account_id) {
        return Err(AppError::forbidden("cannot vote on behalf of another account"));
    }

    let outcome = state
        .service
        .up_vote_book(&state.call_context(), account_id, book_id)
        .await?;
    Ok(vote_envelope(outcome, "Successfully upvoted"))
}

async fn downvote_book(
    State(state): State<BooksState>,
    Authenticated(principal): Authenticated,
    Path((account_id, id)): Path<(String, String)>,
) -> Result<Envelope, AppError> {
    let (account_id, book_id) = (parse_id("account", &account_id)?, parse_id("book", &id)?);
    if !principal.may_act_for(account_id) {
        return Err(AppError::forbidden("cannot vote on behalf of another account"));
    }

    let outcome = state
        .service
        .down_vote_book(&state.call_context(), account_id, book_id)
        .await?;
    Ok(vote_envelope(outcome, "Successfully downvoted"))
}

fn vote_envelope(outcome: VoteOutcome, changed: &str) -> Envelope {
    let message = match outcome.decision {
        VoteDecision::Unchanged => "Vote already recorded",
        VoteDecision::Create | VoteDecision::Flip { .. } => changed,
    };
    Envelope::ok(message).with_count(outcome.count)
}

#[cfg(test)]
mod tests;
