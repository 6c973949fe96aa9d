use anyhow::Context;
use catalog_kernel::{settings::Settings, InitCtx};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load catalog settings")?;
    catalog_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        db = %settings.database.url,
        "catalog-app bootstrap starting"
    );

    let pool = catalog_db::connect(&settings.database).await?;
    let registry = catalog_app::registry();

    let applied = catalog_app::migrate(&pool, &registry).await?;
    tracing::info!(applied, modules = registry.module_count(), "migrations up to date");

    let abort = CancellationToken::new();
    let ctx = InitCtx {
        settings: &settings,
        db: &pool,
        shutdown: &abort,
    };
    registry.init_all(&ctx).await?;
    registry.start_all(&ctx).await?;

    let served = catalog_http::start_server(&registry, &settings, abort.clone()).await;

    registry.stop_all().await?;
    pool.close().await;
    tracing::info!("catalog-app stopped");

    served
}
