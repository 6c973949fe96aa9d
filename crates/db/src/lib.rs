//! SQLite connection factory and module migration runner.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use catalog_kernel::settings::DatabaseSettings;
use catalog_kernel::Migration;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        module     TEXT    NOT NULL,
        id         TEXT    NOT NULL,
        applied_at INTEGER NOT NULL,
        PRIMARY KEY (module, id)
    )
"#;

/// Open a pool against the configured SQLite database.
///
/// File-backed databases run in WAL mode so readers never block the single
/// writer. In-memory databases are pinned to one long-lived connection,
/// otherwise the data would vanish with the last idle connection.
pub async fn connect(settings: &DatabaseSettings) -> anyhow::Result<SqlitePool> {
    let in_memory = settings.url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(&settings.url)
        .with_context(|| format!("invalid database url '{}'", settings.url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(settings.busy_timeout_ms));

    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(settings.max_connections)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("failed to connect to {}", settings.url))?;

    tracing::info!(
        target: "catalog-db",
        url = %settings.url,
        in_memory,
        "database pool ready"
    );

    Ok(pool)
}

/// Apply every migration not yet recorded in `_migrations`.
///
/// Each migration runs in its own transaction together with its bookkeeping
/// row. Returns how many migrations were applied.
pub async fn migrate(
    pool: &SqlitePool,
    migrations: &[(String, Migration)],
) -> anyhow::Result<usize> {
    sqlx::query(CREATE_MIGRATIONS_TABLE)
        .execute(pool)
        .await
        .with_context(|| "failed to create migrations table")?;

    let mut applied = 0;

    for (module, migration) in migrations {
        let mut tx = pool.begin().await?;

        let already =
            sqlx::query("SELECT 1 AS present FROM _migrations WHERE module = ? AND id = ?")
                .bind(module)
                .bind(migration.id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.get::<i64, _>("present"))
                .is_some();

        if already {
            tracing::debug!(
                target: "catalog-db",
                %module,
                id = migration.id,
                "migration already applied"
            );
            continue;
        }

        sqlx::raw_sql(migration.up)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("migration {}/{} failed", module, migration.id))?;

        sqlx::query("INSERT INTO _migrations (module, id, applied_at) VALUES (?, ?, ?)")
            .bind(module)
            .bind(migration.id)
            .bind(time::OffsetDateTime::now_utc().unix_timestamp())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(target: "catalog-db", %module, id = migration.id, "migration applied");
        applied += 1;
    }

    Ok(applied)
}
