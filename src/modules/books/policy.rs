//! Rules for casting, flipping and repeating votes.
//!
//! The ledger holds at most one entry per `(account, book)`. A repeated vote
//! in the same direction writes nothing; a vote in the opposite direction
//! flips the entry. The count is never adjusted in place: stores recompute
//! it from the ledger whenever an entry changes.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use catalog_kernel::settings::VotingSettings;
use catalog_kernel::CallContext;
use uuid::Uuid;

use super::models::VoteDirection;
use super::store::{BookStore, Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDecision {
    /// No entry existed; one was created.
    Create,
    /// The entry already had the requested direction.
    Unchanged,
    /// The entry pointed the other way and was flipped.
    Flip { from: VoteDirection },
}

impl VoteDecision {
    pub fn mutates_ledger(self) -> bool {
        !matches!(self, VoteDecision::Unchanged)
    }
}

pub fn decide(existing: Option<VoteDirection>, requested: VoteDirection) -> VoteDecision {
    match existing {
        None => VoteDecision::Create,
        Some(current) if current == requested => VoteDecision::Unchanged,
        Some(current) => VoteDecision::Flip { from: current },
    }
}

/// Applies [`decide`] against a store, re-reading and retrying when another
/// writer changes the same entry between the read and the write.
#[derive(Debug, Clone)]
pub struct VoteLedgerPolicy {
    base_delay: Duration,
    max_retries: usize,
}

impl VoteLedgerPolicy {
    pub fn new(settings: &VotingSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_retries: settings.conflict_retries,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.base_delay.saturating_mul(20))
            .with_max_times(self.max_retries)
            .with_jitter()
    }

    pub async fn cast(
        &self,
        store: &dyn BookStore,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
        direction: VoteDirection,
    ) -> Result<VoteDecision> {
        let attempt = move || async move {
            let existing = store
                .get_vote(ctx, account_id, book_id)
                .await?
                .map(|entry| entry.direction);

            let decision = decide(existing, direction);
            if decision.mutates_ledger() {
                store
                    .record_vote(ctx, account_id, book_id, direction, existing)
                    .await?;
            }

            Ok::<_, StoreError>(decision)
        };

        self.retry_conflicts(attempt, account_id, book_id).await
    }

    /// Run `op` again while it fails with [`StoreError::Conflict`], up to the
    /// configured number of retries.
    pub async fn retry_conflicts<T, F, Fut>(
        &self,
        op: F,
        account_id: Uuid,
        book_id: Uuid,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        op.retry(self.backoff())
            .when(StoreError::is_conflict)
            .notify(|err: &StoreError, delay: Duration| {
                tracing::debug!(
                    %account_id,
                    %book_id,
                    error = %err,
                    ?delay,
                    "store call raced another writer, retrying"
                );
            })
            .await
    }
}

impl Default for VoteLedgerPolicy {
    fn default() -> Self {
        Self::new(&VotingSettings::default())
    }
}
