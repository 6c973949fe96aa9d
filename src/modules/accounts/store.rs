//! Account persistence.

use async_trait::async_trait;
use catalog_kernel::{CallContext, Cancelled};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use super::models::Account;

pub type Result<T> = std::result::Result<T, AccountError>;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account not found: {0}")]
    NotFound(Uuid),

    #[error("validation failed: {0}")]
    Validation(String),

    /// The database was locked by another writer; retrying may succeed.
    #[error("concurrent write on account {0}")]
    Conflict(Uuid),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub const CREATE_ACCOUNT_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id         TEXT    PRIMARY KEY NOT NULL,
        name       TEXT    NOT NULL CHECK (length(trim(name)) > 0),
        email      TEXT    NOT NULL UNIQUE CHECK (instr(email, '@') > 0),
        created_at INTEGER NOT NULL
    );
"#;

const ACCOUNT_COLUMNS: &str = "id, name, email, created_at";

const SQLITE_BUSY: i32 = 5;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, ctx: &CallContext, id: Uuid) -> Result<Account>;

    async fn create(&self, ctx: &CallContext, account: Account) -> Result<Account>;

    /// Persist name and email; `created_at` never changes.
    async fn update(&self, ctx: &CallContext, account: Account) -> Result<Account>;

    /// Remove the account. Votes and books it owns are left in place.
    async fn delete(&self, ctx: &CallContext, id: Uuid) -> Result<()>;
}

pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn write_error(err: sqlx::Error) -> AccountError {
    let constraint = matches!(
        &err,
        sqlx::Error::Database(db) if !matches!(db.kind(), sqlx::error::ErrorKind::Other)
    );
    if constraint {
        AccountError::Validation(err.to_string())
    } else {
        AccountError::Database(err)
    }
}

fn busy_error(err: AccountError, id: Uuid) -> AccountError {
    let busy = matches!(
        &err,
        AccountError::Database(sqlx::Error::Database(db))
            if db.code().and_then(|code| code.parse::<i32>().ok()).map(|code| code & 0xff)
                == Some(SQLITE_BUSY)
    );
    if busy {
        AccountError::Conflict(id)
    } else {
        err
    }
}

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    let id: &str = row.try_get("id")?;
    Ok(Account {
        id: Uuid::parse_str(id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn get(&self, ctx: &CallContext, id: Uuid) -> Result<Account> {
        ctx.run(async {
            let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

            row.map_or(Err(AccountError::NotFound(id)), |row| account_from_row(&row))
        })
        .await
        .map_err(|err| busy_error(err, id))
    }

    async fn create(&self, ctx: &CallContext, account: Account) -> Result<Account> {
        ctx.run(async {
            let row = sqlx::query(&format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?, ?, ?, ?) \
                 RETURNING {ACCOUNT_COLUMNS}"
            ))
            .bind(account.id.to_string())
            .bind(&account.name)
            .bind(&account.email)
            .bind(account.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(write_error)?;

            account_from_row(&row)
        })
        .await
        .map_err(|err| busy_error(err, account.id))
    }

    async fn update(&self, ctx: &CallContext, account: Account) -> Result<Account> {
        ctx.run(async {
            let row = sqlx::query(&format!(
                "UPDATE accounts SET name = ?, email = ? WHERE id = ? RETURNING {ACCOUNT_COLUMNS}"
            ))
            .bind(&account.name)
            .bind(&account.email)
            .bind(account.id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(write_error)?;

            row.map_or(Err(AccountError::NotFound(account.id)), |row| {
                account_from_row(&row)
            })
        })
        .await
        .map_err(|err| busy_error(err, account.id))
    }

    async fn delete(&self, ctx: &CallContext, id: Uuid) -> Result<()> {
        ctx.run(async {
            let deleted = sqlx::query("DELETE FROM accounts WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
                .rows_affected();

            if deleted == 0 {
                return Err(AccountError::NotFound(id));
            }
            Ok(())
        })
        .await
        .map_err(|err| busy_error(err, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteAccountStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::raw_sql(CREATE_ACCOUNT_TABLES)
            .execute(&pool)
            .await
            .unwrap();
        SqliteAccountStore::new(pool)
    }

    #[tokio::test]
    async fn account_round_trips_through_sqlite() {
        let store = store().await;
        let ctx = CallContext::new();
        let account = Account::new("Ada".into(), "ada@example.com".into());

        let created = store.create(&ctx, account.clone()).await.unwrap();
        assert_eq!(created, account);
        assert_eq!(store.get(&ctx, account.id).await.unwrap(), account);

        let mut renamed = account.clone();
        renamed.name = "Ada Lovelace".into();
        let updated = store.update(&ctx, renamed).await.unwrap();
        assert_eq!(updated.name, "Ada Lovelace");
        assert_eq!(updated.created_at, account.created_at);

        store.delete(&ctx, account.id).await.unwrap();
        assert!(matches!(
            store.get(&ctx, account.id).await,
            Err(AccountError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&ctx, account.id).await,
            Err(AccountError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_email_is_a_validation_error() {
        let store = store().await;
        let ctx = CallContext::new();
        store
            .create(&ctx, Account::new("Ada".into(), "ada@example.com".into()))
            .await
            .unwrap();

        let err = store
            .create(&ctx, Account::new("Other".into(), "ada@example.com".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Validation(_)));
    }

    #[tokio::test]
    async fn held_write_lock_surfaces_as_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let pool = catalog_db::connect(&catalog_kernel::settings::DatabaseSettings {
            url: format!("sqlite://{}", dir.path().join("accounts.db").display()),
            max_connections: 4,
            busy_timeout_ms: 20,
        })
        .await
        .unwrap();
        sqlx::raw_sql(CREATE_ACCOUNT_TABLES)
            .execute(&pool)
            .await
            .unwrap();
        let store = SqliteAccountStore::new(pool.clone());
        let ctx = CallContext::new();

        let mut holder = pool.acquire().await.unwrap();
        sqlx::raw_sql("BEGIN IMMEDIATE")
            .execute(&mut *holder)
            .await
            .unwrap();

        let account = Account::new("Ada".into(), "ada@example.com".into());
        assert!(matches!(
            store.create(&ctx, account.clone()).await,
            Err(AccountError::Conflict(id)) if id == account.id
        ));

        sqlx::raw_sql("ROLLBACK")
            .execute(&mut *holder)
            .await
            .unwrap();
        drop(holder);
        assert_eq!(store.create(&ctx, account.clone()).await.unwrap(), account);
    }
}
