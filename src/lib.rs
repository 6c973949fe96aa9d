//! Catalog application library
//!
//! Domain modules for books, their vote ledger, and accounts.

pub mod modules;
pub mod utils;

pub use modules::*;

use anyhow::Context;
use catalog_kernel::ModuleRegistry;
use sqlx::SqlitePool;

/// A registry holding every catalog module, in mount order.
pub fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    register_all(&mut registry);
    registry
}

/// Apply pending migrations of every registered module, returning how many ran.
pub async fn migrate(pool: &SqlitePool, registry: &ModuleRegistry) -> anyhow::Result<usize> {
    catalog_db::migrate(pool, &registry.collect_migrations())
        .await
        .with_context(|| "failed to apply catalog migrations")
}
