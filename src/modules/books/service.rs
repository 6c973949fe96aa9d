use std::sync::Arc;

use catalog_kernel::CallContext;
use tracing::Instrument;
use uuid::Uuid;

use super::models::{Book, VoteDirection};
use super::policy::{VoteDecision, VoteLedgerPolicy};
use super::store::{BookStore, Result, StoreError};

/// What a vote call did to the ledger, and the count afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub decision: VoteDecision,
    pub count: i64,
}

/// Stateless orchestration of book CRUD and voting over a [`BookStore`].
///
/// Store errors are returned unchanged so the HTTP layer can map their kind;
/// this layer only adds spans and events naming the operation and ids.
#[derive(Clone)]
pub struct BookService {
    store: Arc<dyn BookStore>,
    policy: VoteLedgerPolicy,
}

fn require_id(kind: &str, id: Uuid) -> Result<()> {
    if id.is_nil() {
        return Err(StoreError::Validation(format!("{kind} id must not be nil")));
    }
    Ok(())
}

fn require_title(book: &Book) -> Result<()> {
    if book.title.trim().is_empty() {
        return Err(StoreError::Validation("title must not be empty".into()));
    }
    Ok(())
}

impl BookService {
    pub fn new(store: Arc<dyn BookStore>, policy: VoteLedgerPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn get_book(&self, ctx: &CallContext, id: Uuid) -> Result<Book> {
        tracing::debug!(book_id = %id, "retrieving book");
        self.store.get_book(ctx, id).await
    }

    pub async fn create_book(&self, ctx: &CallContext, book: Book) -> Result<Book> {
        require_title(&book)?;
        require_id("account", book.account_id)?;

        let created = self.store.create_book(ctx, book).await?;
        tracing::info!(book_id = %created.id, account_id = %created.account_id, "book created");
        Ok(created)
    }

    pub async fn update_book(&self, ctx: &CallContext, book: Book) -> Result<Book> {
        require_title(&book)?;
        self.store.get_book(ctx, book.id).await?;

        let updated = self.store.update_book(ctx, book).await?;
        tracing::info!(book_id = %updated.id, "book updated");
        Ok(updated)
    }

    pub async fn delete_book(&self, ctx: &CallContext, id: Uuid) -> Result<()> {
        self.store.get_book(ctx, id).await?;
        self.store.delete_book(ctx, id).await?;
        tracing::info!(book_id = %id, "book deleted");
        Ok(())
    }

    pub async fn up_vote_book(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
    ) -> Result<VoteOutcome> {
        self.vote(ctx, account_id, book_id, VoteDirection::Up).await
    }

    pub async fn down_vote_book(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
    ) -> Result<VoteOutcome> {
        self.vote(ctx, account_id, book_id, VoteDirection::Down)
            .await
    }

    /// Net votes for the book; `NotFound` when the book does not exist.
    pub async fn get_up_vote_count(&self, ctx: &CallContext, id: Uuid) -> Result<i64> {
        self.store.get_upvote_count(ctx, id).await
    }

    async fn vote(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
        direction: VoteDirection,
    ) -> Result<VoteOutcome> {
        require_id("account", account_id)?;
        require_id("book", book_id)?;

        let span = tracing::info_span!("vote", %account_id, %book_id, %direction);
        async {
            let decision = self
                .policy
                .cast(self.store.as_ref(), ctx, account_id, book_id, direction)
                .await?;

            // Always resync from the ledger, even for a repeated vote, so a
            // count that drifted for any reason converges here. The vote may
            // already be committed, so a locked database is waited out.
            let count = self
                .policy
                .retry_conflicts(
                    || self.store.recompute_upvote_count(ctx, book_id),
                    account_id,
                    book_id,
                )
                .await?;

            tracing::info!(?decision, count, "vote applied");
            Ok(VoteOutcome { decision, count })
        }
        .instrument(span)
        .await
    }
}
