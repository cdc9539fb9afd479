use clap::Parser;
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seva_core::cli::{Cli, Commands, DbCommands};
use seva_core::{config, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = config::Config::from_env()?;

    match cli.command {
        Some(Commands::Db(DbCommands::Migrate)) => {
            seva_core::cli::handle_db_migrate(&config).await?;
        }
        Some(Commands::Config) => {
            seva_core::cli::handle_config_validate(&config)?;
        }
        Some(Commands::Serve) | None => {
            serve(config).await?;
        }
    }

    Ok(())
}

async fn serve(config: config::Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let report = seva_core::startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.is_valid() {
        tracing::warn!("startup validation reported failures, continuing anyway");
    }

    let state = AppState::new(pool, &config);
    let app = seva_core::create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
