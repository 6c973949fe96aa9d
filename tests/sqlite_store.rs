use std::sync::Arc;

use catalog_app::books::models::{Book, VoteDirection};
use catalog_app::books::policy::{VoteDecision, VoteLedgerPolicy};
use catalog_app::books::service::BookService;
use catalog_app::books::sqlite::SqliteBookStore;
use catalog_app::books::store::{BookStore, StoreError};
use catalog_kernel::settings::{DatabaseSettings, VotingSettings};
use catalog_kernel::CallContext;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

async fn file_pool(dir: &TempDir) -> SqlitePool {
    file_pool_with_timeout(dir, 5_000).await
}

async fn file_pool_with_timeout(dir: &TempDir, busy_timeout_ms: u64) -> SqlitePool {
    let settings = DatabaseSettings {
        url: format!("sqlite://{}", dir.path().join("catalog.db").display()),
        max_connections: 8,
        busy_timeout_ms,
    };
    let pool = catalog_db::connect(&settings).await.unwrap();
    catalog_app::migrate(&pool, &catalog_app::registry())
        .await
        .unwrap();
    pool
}

fn service(store: Arc<SqliteBookStore>) -> BookService {
    BookService::new(
        store,
        VoteLedgerPolicy::new(&VotingSettings {
            conflict_retries: 50,
            retry_base_delay_ms: 1,
        }),
    )
}

async fn book(service: &BookService) -> Book {
    service
        .create_book(
            &CallContext::new(),
            Book::new(
                Uuid::now_v7(),
                "Go in Action".into(),
                "William Kennedy".into(),
                2015,
            ),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn go_in_action_walkthrough() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteBookStore::new(file_pool(&dir).await));
    let service = service(store.clone());
    let ctx = CallContext::new();
    let book = book(&service).await;
    let (a1, a2) = (Uuid::now_v7(), Uuid::now_v7());

    assert_eq!(service.get_up_vote_count(&ctx, book.id).await.unwrap(), 0);
    assert_eq!(service.up_vote_book(&ctx, a1, book.id).await.unwrap().count, 1);
    assert_eq!(service.up_vote_book(&ctx, a2, book.id).await.unwrap().count, 2);

    let repeat = service.up_vote_book(&ctx, a2, book.id).await.unwrap();
    assert_eq!(repeat.decision, VoteDecision::Unchanged);
    assert_eq!(repeat.count, 2);

    assert_eq!(service.down_vote_book(&ctx, a1, book.id).await.unwrap().count, 0);
    assert_eq!(service.up_vote_book(&ctx, a1, book.id).await.unwrap().count, 2);

    let stored = service.get_book(&ctx, book.id).await.unwrap();
    assert_eq!(stored.upvotes, 2);
}

#[tokio::test]
async fn delete_removes_votes_with_the_book() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir).await;
    let store = Arc::new(SqliteBookStore::new(pool.clone()));
    let service = service(store.clone());
    let ctx = CallContext::new();
    let book = book(&service).await;
    let account = Uuid::now_v7();

    service.down_vote_book(&ctx, account, book.id).await.unwrap();
    service.delete_book(&ctx, book.id).await.unwrap();

    let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM book_votes WHERE book_id = ?")
        .bind(book.id.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(matches!(
        store.get_vote(&ctx, account, book.id).await,
        Ok(None)
    ));
    assert!(matches!(
        service.get_up_vote_count(&ctx, book.id).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn votes_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let account = Uuid::now_v7();
    let book_id = {
        let pool = file_pool(&dir).await;
        let service = service(Arc::new(SqliteBookStore::new(pool.clone())));
        let book = book(&service).await;
        service
            .up_vote_book(&CallContext::new(), account, book.id)
            .await
            .unwrap();
        pool.close().await;
        book.id
    };

    let store = SqliteBookStore::new(file_pool(&dir).await);
    let ctx = CallContext::new();
    assert_eq!(store.get_upvote_count(&ctx, book_id).await.unwrap(), 1);
    assert!(store
        .has_voted(&ctx, account, book_id, VoteDirection::Up)
        .await
        .unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_converge_on_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteBookStore::new(file_pool(&dir).await));
    let service = service(store.clone());
    let book = book(&service).await;
    let accounts: Vec<Uuid> = (0..12).map(|_| Uuid::now_v7()).collect();

    let mut tasks = Vec::new();
    for (i, account) in accounts.iter().copied().enumerate() {
        for round in 0..3 {
            let service = service.clone();
            let book_id = book.id;
            tasks.push(tokio::spawn(async move {
                let ctx = CallContext::new();
                if (i * 3 + round) % 4 == 0 {
                    service.down_vote_book(&ctx, account, book_id).await
                } else {
                    service.up_vote_book(&ctx, account, book_id).await
                }
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let ctx = CallContext::new();
    let mut net = 0;
    for account in &accounts {
        let entry = store.get_vote(&ctx, *account, book.id).await.unwrap();
        net += entry.map(|entry| entry.direction.weight()).unwrap_or_default();
    }
    assert_eq!(service.get_up_vote_count(&ctx, book.id).await.unwrap(), net);
}

#[tokio::test]
async fn cancelled_vote_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteBookStore::new(file_pool(&dir).await));
    let service = service(store.clone());
    let book = book(&service).await;
    let account = Uuid::now_v7();

    let ctx = CallContext::new();
    ctx.cancel();
    assert!(matches!(
        service.up_vote_book(&ctx, account, book.id).await,
        Err(StoreError::Cancelled(_))
    ));

    let fresh = CallContext::new();
    assert!(store.get_vote(&fresh, account, book.id).await.unwrap().is_none());
    assert_eq!(store.get_upvote_count(&fresh, book.id).await.unwrap(), 0);
}

#[tokio::test]
async fn vote_waits_out_a_briefly_held_write_lock() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool_with_timeout(&dir, 20).await;
    let store = Arc::new(SqliteBookStore::new(pool.clone()));
    let service = service(store.clone());
    let book = book(&service).await;

    let mut holder = pool.acquire().await.unwrap();
    sqlx::raw_sql("BEGIN IMMEDIATE")
        .execute(&mut *holder)
        .await
        .unwrap();
    let release = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        sqlx::Executor::execute(&mut *holder, "ROLLBACK")
            .await
            .unwrap();
    });

    let outcome = service
        .up_vote_book(&CallContext::new(), Uuid::now_v7(), book.id)
        .await
        .unwrap();
    release.await.unwrap();

    assert_eq!(outcome.decision, VoteDecision::Create);
    assert_eq!(outcome.count, 1);
}
