use anyhow::Context;
use catalog_authz::TokenVerifier;
use catalog_kernel::settings::Settings;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "catalog", version, about = "Catalog service management")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending module migrations to the configured database
    Migrate,
    /// Print a signed bearer token
    IssueToken {
        /// Account the token acts for; omit for a service token
        #[arg(long)]
        sub: Option<Uuid>,
        /// Lifetime in seconds; omit for a token without expiry
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Load settings and print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().with_context(|| "failed to load catalog settings")?;
    catalog_telemetry::init(&settings.telemetry)?;

    match cli.command {
        Command::Migrate => {
            let pool = catalog_db::connect(&settings.database).await?;
            let applied = catalog_app::migrate(&pool, &catalog_app::registry()).await?;
            pool.close().await;
            println!("applied {applied} migration(s)");
        }
        Command::IssueToken { sub, ttl_secs } => {
            let token = TokenVerifier::new(&settings.auth)
                .issue(sub, ttl_secs)
                .with_context(|| "failed to sign token")?;
            println!("{token}");
        }
        Command::CheckConfig => {
            tracing::debug!(env = ?settings.environment, "configuration loaded");
            println!("environment: {:?}", settings.environment);
            println!("listen:      {}:{}", settings.server.host, settings.server.port);
            println!("database:    {}", settings.database.url);
            println!("log format:  {:?}", settings.telemetry.log_format);
            println!(
                "voting:      {} retries, {}ms base delay",
                settings.voting.conflict_retries, settings.voting.retry_base_delay_ms
            );
        }
    }

    Ok(())
}
