//! In-memory [`BookStore`] for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use catalog_kernel::CallContext;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{Book, VoteDirection, VoteEntry};
use super::store::{BookStore, Result, StoreError};

#[derive(Default)]
struct Ledger {
    books: HashMap<Uuid, Book>,
    votes: HashMap<(Uuid, Uuid), VoteEntry>,
}

impl Ledger {
    fn net_votes(&self, book_id: Uuid) -> i64 {
        self.votes
            .values()
            .filter(|entry| entry.book_id == book_id)
            .map(|entry| entry.direction.weight())
            .sum()
    }

    fn recount(&mut self, book_id: Uuid) -> Result<i64> {
        let net = self.net_votes(book_id);
        let book = self
            .books
            .get_mut(&book_id)
            .ok_or_else(|| StoreError::book_not_found(book_id))?;
        book.upvotes = net;
        Ok(net)
    }
}

/// Every mutation happens under one write guard with no await point in
/// between, so a ledger write and its recount are observed together.
#[derive(Default)]
pub struct InMemoryBookStore {
    ledger: RwLock<Ledger>,
    pending_conflicts: AtomicUsize,
}

impl InMemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Hooks for exercising conflict and drift handling.
#[cfg(any(test, feature = "test-util"))]
impl InMemoryBookStore {
    /// Make the next `n` calls to `record_vote` fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of ledger entries for `book_id`, regardless of direction.
    pub async fn ledger_len(&self, book_id: Uuid) -> usize {
        self.ledger
            .read()
            .await
            .votes
            .values()
            .filter(|entry| entry.book_id == book_id)
            .count()
    }

    /// Overwrite the stored count without touching the ledger.
    pub async fn corrupt_count(&self, book_id: Uuid, upvotes: i64) {
        if let Some(book) = self.ledger.write().await.books.get_mut(&book_id) {
            book.upvotes = upvotes;
        }
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    async fn get_book(&self, ctx: &CallContext, id: Uuid) -> Result<Book> {
        ctx.run(async {
            self.ledger
                .read()
                .await
                .books
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::book_not_found(id))
        })
        .await
    }

    async fn create_book(&self, ctx: &CallContext, book: Book) -> Result<Book> {
        ctx.run(async {
            if book.title.trim().is_empty() {
                return Err(StoreError::Validation("title must not be empty".into()));
            }

            let mut ledger = self.ledger.write().await;
            if ledger.books.contains_key(&book.id) {
                return Err(StoreError::Validation(format!(
                    "book {} already exists",
                    book.id
                )));
            }

            let stored = Book { upvotes: 0, ..book };
            ledger.books.insert(stored.id, stored.clone());
            Ok(stored)
        })
        .await
    }

    async fn update_book(&self, ctx: &CallContext, book: Book) -> Result<Book> {
        ctx.run(async {
            let mut ledger = self.ledger.write().await;
            let stored = ledger
                .books
                .get_mut(&book.id)
                .ok_or_else(|| StoreError::book_not_found(book.id))?;

            stored.title = book.title;
            stored.author = book.author;
            stored.year = book.year;
            Ok(stored.clone())
        })
        .await
    }

    async fn delete_book(&self, ctx: &CallContext, id: Uuid) -> Result<()> {
        ctx.run(async {
            let mut ledger = self.ledger.write().await;
            if ledger.books.remove(&id).is_none() {
                return Err(StoreError::book_not_found(id));
            }
            ledger.votes.retain(|_, entry| entry.book_id != id);
            Ok(())
        })
        .await
    }

    async fn get_vote(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
    ) -> Result<Option<VoteEntry>> {
        ctx.run(async {
            Ok(self
                .ledger
                .read()
                .await
                .votes
                .get(&(account_id, book_id))
                .cloned())
        })
        .await
    }

    async fn record_vote(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
        direction: VoteDirection,
        expected: Option<VoteDirection>,
    ) -> Result<VoteEntry> {
        ctx.run(async {
            let mut ledger = self.ledger.write().await;
            if !ledger.books.contains_key(&book_id) {
                return Err(StoreError::book_not_found(book_id));
            }

            let current = ledger
                .votes
                .get(&(account_id, book_id))
                .map(|entry| entry.direction);
            if current != expected || self.take_injected_conflict() {
                return Err(StoreError::vote_conflict(account_id, book_id));
            }

            let entry = VoteEntry {
                account_id,
                book_id,
                direction,
                updated_at: OffsetDateTime::now_utc(),
            };
            ledger.votes.insert((account_id, book_id), entry.clone());
            ledger.recount(book_id)?;

            Ok(entry)
        })
        .await
    }

    async fn recompute_upvote_count(&self, ctx: &CallContext, book_id: Uuid) -> Result<i64> {
        ctx.run(async { self.ledger.write().await.recount(book_id) })
            .await
    }

    async fn get_upvote_count(&self, ctx: &CallContext, book_id: Uuid) -> Result<i64> {
        ctx.run(async {
            self.ledger
                .read()
                .await
                .books
                .get(&book_id)
                .map(|book| book.upvotes)
                .ok_or_else(|| StoreError::book_not_found(book_id))
        })
        .await
    }
}
