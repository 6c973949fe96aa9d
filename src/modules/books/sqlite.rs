//! SQLite implementation of the book store.
//!
//! A vote is one transaction that opens with its ledger write, so it takes
//! the database write lock up front (waiting out `busy_timeout`), then
//! recomputes the count with a single aggregate `UPDATE` before committing.

use async_trait::async_trait;
use catalog_kernel::CallContext;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::models::{Book, VoteDirection, VoteEntry};
use super::store::{BookStore, Result, StoreError};

pub const CREATE_BOOK_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS books (
        id         TEXT    PRIMARY KEY NOT NULL,
        account_id TEXT    NOT NULL,
        title      TEXT    NOT NULL CHECK (length(trim(title)) > 0),
        author     TEXT    NOT NULL DEFAULT '',
        year       INTEGER NOT NULL DEFAULT 0,
        upvotes    INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS book_votes (
        account_id TEXT    NOT NULL,
        book_id    TEXT    NOT NULL REFERENCES books (id) ON DELETE CASCADE,
        direction  TEXT    NOT NULL CHECK (direction IN ('up', 'down')),
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (account_id, book_id)
    );

    CREATE INDEX IF NOT EXISTS book_votes_by_book ON book_votes (book_id);
"#;

const BOOK_COLUMNS: &str = "id, account_id, title, author, year, upvotes";

const RECOUNT: &str = r#"
    UPDATE books
    SET upvotes = (
        SELECT COALESCE(SUM(CASE direction WHEN 'up' THEN 1 ELSE -1 END), 0)
        FROM book_votes
        WHERE book_id = ?
    )
    WHERE id = ?
    RETURNING upvotes
"#;

// SQLite primary result codes; extended codes keep them in the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

pub struct SqliteBookStore {
    pool: SqlitePool,
}

impl SqliteBookStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables directly; normally the books module migration does this.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_BOOK_TABLES).execute(&self.pool).await?;
        Ok(())
    }
}

fn primary_code(err: &sqlx::Error) -> Option<i32> {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff),
        _ => None,
    }
}

/// Reclassify a lock timeout as a conflict on `book_id`; other errors pass through.
fn busy_error(err: StoreError, book_id: Uuid, account_id: Option<Uuid>) -> StoreError {
    match err {
        StoreError::Database(db)
            if matches!(primary_code(&db), Some(SQLITE_BUSY | SQLITE_LOCKED)) =>
        {
            tracing::debug!(%book_id, error = %db, "database busy");
            StoreError::Conflict {
                book_id,
                account_id,
            }
        }
        other => other,
    }
}

fn write_error(err: sqlx::Error) -> StoreError {
    match primary_code(&err) {
        Some(SQLITE_CONSTRAINT) => StoreError::Validation(err.to_string()),
        _ => StoreError::Database(err),
    }
}

fn parse_uuid(raw: &str) -> std::result::Result<Uuid, sqlx::Error> {
    Uuid::parse_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn book_from_row(row: &SqliteRow) -> Result<Book> {
    Ok(Book {
        id: parse_uuid(row.try_get("id")?)?,
        account_id: parse_uuid(row.try_get("account_id")?)?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        year: row.try_get("year")?,
        upvotes: row.try_get("upvotes")?,
    })
}

fn vote_from_row(row: &SqliteRow) -> Result<VoteEntry> {
    let direction: &str = row.try_get("direction")?;
    let direction = VoteDirection::parse(direction).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown vote direction '{}'", direction).into())
    })?;
    let updated_at: i64 = row.try_get("updated_at")?;

    Ok(VoteEntry {
        account_id: parse_uuid(row.try_get("account_id")?)?,
        book_id: parse_uuid(row.try_get("book_id")?)?,
        direction,
        updated_at: OffsetDateTime::from_unix_timestamp(updated_at)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
    })
}

async fn recount(
    tx: &mut Transaction<'_, Sqlite>,
    book_id: Uuid,
) -> std::result::Result<Option<i64>, sqlx::Error> {
    let id = book_id.to_string();
    let row = sqlx::query(RECOUNT)
        .bind(&id)
        .bind(&id)
        .fetch_optional(&mut **tx)
        .await?;

    row.map(|row| row.try_get::<i64, _>("upvotes")).transpose()
}

async fn book_exists(
    tx: &mut Transaction<'_, Sqlite>,
    book_id: Uuid,
) -> std::result::Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 AS present FROM books WHERE id = ?")
        .bind(book_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

#[async_trait]
impl BookStore for SqliteBookStore {
    async fn get_book(&self, ctx: &CallContext, id: Uuid) -> Result<Book> {
        ctx.run(async {
            let row = sqlx::query(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

            match row {
                Some(row) => book_from_row(&row),
                None => Err(StoreError::book_not_found(id)),
            }
        })
        .await
        .map_err(|err| busy_error(err, id, None))
    }

    async fn create_book(&self, ctx: &CallContext, book: Book) -> Result<Book> {
        ctx.run(async {
            if book.title.trim().is_empty() {
                return Err(StoreError::Validation("title must not be empty".into()));
            }

            let row = sqlx::query(&format!(
                "INSERT INTO books ({BOOK_COLUMNS}) VALUES (?, ?, ?, ?, ?, 0) \
                 RETURNING {BOOK_COLUMNS}"
            ))
            .bind(book.id.to_string())
            .bind(book.account_id.to_string())
            .bind(&book.title)
            .bind(&book.author)
            .bind(book.year)
            .fetch_one(&self.pool)
            .await
            .map_err(write_error)?;

            book_from_row(&row)
        })
        .await
        .map_err(|err| busy_error(err, book.id, None))
    }

    async fn update_book(&self, ctx: &CallContext, book: Book) -> Result<Book> {
        ctx.run(async {
            let row = sqlx::query(&format!(
                "UPDATE books SET title = ?, author = ?, year = ? WHERE id = ? \
                 RETURNING {BOOK_COLUMNS}"
            ))
            .bind(&book.title)
            .bind(&book.author)
            .bind(book.year)
            .bind(book.id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(write_error)?;

            match row {
                Some(row) => book_from_row(&row),
                None => Err(StoreError::book_not_found(book.id)),
            }
        })
        .await
        .map_err(|err| busy_error(err, book.id, None))
    }

    async fn delete_book(&self, ctx: &CallContext, id: Uuid) -> Result<()> {
        ctx.run(async {
            let id_str = id.to_string();
            let mut tx = self.pool.begin().await?;

            // Explicit so the cascade holds even without PRAGMA foreign_keys.
            sqlx::query("DELETE FROM book_votes WHERE book_id = ?")
                .bind(&id_str)
                .execute(&mut *tx)
                .await?;
            let deleted = sqlx::query("DELETE FROM books WHERE id = ?")
                .bind(&id_str)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if deleted == 0 {
                return Err(StoreError::book_not_found(id));
            }

            tx.commit().await?;
            Ok(())
        })
        .await
        .map_err(|err| busy_error(err, id, None))
    }

    async fn get_vote(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
    ) -> Result<Option<VoteEntry>> {
        ctx.run(async {
            let row = sqlx::query(
                "SELECT account_id, book_id, direction, updated_at FROM book_votes \
                 WHERE account_id = ? AND book_id = ?",
            )
            .bind(account_id.to_string())
            .bind(book_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

            row.as_ref().map(vote_from_row).transpose()
        })
        .await
        .map_err(|err| busy_error(err, book_id, Some(account_id)))
    }

    async fn record_vote(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        book_id: Uuid,
        direction: VoteDirection,
        expected: Option<VoteDirection>,
    ) -> Result<VoteEntry> {
        let updated_at = OffsetDateTime::now_utc();

        let write = async {
            let account = account_id.to_string();
            let book = book_id.to_string();
            let mut tx = self.pool.begin().await?;

            let written = match expected {
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO book_votes (account_id, book_id, direction, updated_at)
                        SELECT ?, ?, ?, ?
                        WHERE EXISTS (SELECT 1 FROM books WHERE id = ?)
                        ON CONFLICT (account_id, book_id) DO NOTHING
                        "#,
                    )
                    .bind(&account)
                    .bind(&book)
                    .bind(direction.as_str())
                    .bind(updated_at.unix_timestamp())
                    .bind(&book)
                    .execute(&mut *tx)
                    .await?
                }
                Some(previous) => {
                    sqlx::query(
                        r#"
                        UPDATE book_votes
                        SET direction = ?, updated_at = ?
                        WHERE account_id = ? AND book_id = ? AND direction = ?
                        "#,
                    )
                    .bind(direction.as_str())
                    .bind(updated_at.unix_timestamp())
                    .bind(&account)
                    .bind(&book)
                    .bind(previous.as_str())
                    .execute(&mut *tx)
                    .await?
                }
            }
            .rows_affected();

            if written == 0 {
                // Either the book is gone or another writer moved the entry.
                return Ok(Err(if book_exists(&mut tx, book_id).await? {
                    StoreError::vote_conflict(account_id, book_id)
                } else {
                    StoreError::book_not_found(book_id)
                }));
            }

            let Some(count) = recount(&mut tx, book_id).await? else {
                return Ok(Err(StoreError::book_not_found(book_id)));
            };
            tx.commit().await?;

            tracing::debug!(%account_id, %book_id, %direction, count, "vote recorded");
            Ok::<_, sqlx::Error>(Ok(()))
        };

        ctx.run(async {
            write
                .await
                .map_err(|err| busy_error(err.into(), book_id, Some(account_id)))??;

            Ok(VoteEntry {
                account_id,
                book_id,
                direction,
                updated_at,
            })
        })
        .await
    }

    async fn recompute_upvote_count(&self, ctx: &CallContext, book_id: Uuid) -> Result<i64> {
        ctx.run(async {
            let mut tx = self.pool.begin().await?;
            let count = recount(&mut tx, book_id)
                .await?
                .ok_or_else(|| StoreError::book_not_found(book_id))?;
            tx.commit().await?;
            Ok(count)
        })
        .await
        .map_err(|err| busy_error(err, book_id, None))
    }

    async fn get_upvote_count(&self, ctx: &CallContext, book_id: Uuid) -> Result<i64> {
        ctx.run(async {
            let row = sqlx::query("SELECT upvotes FROM books WHERE id = ?")
                .bind(book_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

            match row {
                Some(row) => Ok(row.try_get::<i64, _>("upvotes")?),
                None => Err(StoreError::book_not_found(book_id)),
            }
        })
        .await
        .map_err(|err| busy_error(err, book_id, None))
    }
}
