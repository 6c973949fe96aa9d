//! Persistence port for books and the vote ledger.

use async_trait::async_trait;
use catalog_kernel::{CallContext, Cancelled};
use thiserror::Error;
use uuid::Uuid;

use super::models::{Book, VoteDirection, VoteEntry};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Another writer got there first (a moved ledger entry or a held
    /// database lock); retrying may succeed. `account_id` is set for votes.
    #[error("concurrent write on book {book_id}")]
    Conflict {
        book_id: Uuid,
        account_id: Option<Uuid>,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn book_not_found(id: Uuid) -> Self {
        StoreError::NotFound { entity: "book", id }
    }

    pub fn vote_conflict(account_id: Uuid, book_id: Uuid) -> Self {
        StoreError::Conflict {
            book_id,
            account_id: Some(account_id),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Durable storage for books and the vote ledger.
///
/// Implementations:
/// - `SqliteBookStore`: SQLite via sqlx
/// - `InMemoryBookStore`: process-local, for tests and local development
///
/// Every call must observe `ctx` and return [`StoreError::Cancelled`]
/// instead of committing part of a mutation.
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn get_book(&self, ctx: &CallContext, id: Uuid) -> Result<Book>;

    async fn create_book(&self, ctx: &CallContext, book: Book) -> Result<Book>;

    /// Persist title, author and year. Owner and count are left untouched.
    async fn update_book(&self, ctx: &CallContext, book: Book) -> Result<Book>;

    /// Remove the book and every ledger entry referencing it.
    async fn delete_book(&self, ctx: &CallContext, id: Uuid) -> Result<()>;

    async fn get_vote(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
    ) -> Result<Option<VoteEntry>>;

    async fn has_voted(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
        direction: VoteDirection,
    ) -> Result<bool> {
        Ok(self
            .get_vote(ctx, account_id, book_id)
            .await?
            .is_some_and(|entry| entry.direction == direction))
    }

    /// Create or flip the `(account, book)` entry.
    ///
    /// `expected` is the direction the caller last observed (`None` for no
    /// entry). If the stored state differs, nothing is written and
    /// [`StoreError::Conflict`] is returned. On success the book's count is
    /// recomputed in the same atomic step as the ledger write.
    async fn record_vote(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
        direction: VoteDirection,
        expected: Option<VoteDirection>,
    ) -> Result<VoteEntry>;

    /// Rebuild the denormalized count from the ledger and persist it.
    async fn recompute_upvote_count(&self, ctx: &CallContext, book_id: Uuid) -> Result<i64>;

    async fn get_upvote_count(&self, ctx: &CallContext, book_id: Uuid) -> Result<i64>;
}
