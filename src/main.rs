//! Service entry point: `serve` runs the HTTP API, `db` manages the schema.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sea_orm::{Database, DatabaseConnection};
use tracing_subscriber::EnvFilter;

use agent_trace_service::api::{self, AppState};
use agent_trace_service::config::AppConfig;
use agent_trace_service::db::schema;

#[derive(Parser)]
#[command(
    name = "agent-trace-service",
    version,
    about = "Provenance tracking for AI-assisted source code"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default).
    Serve,
    /// Schema management.
    Db {
        #[command(subcommand)]
        action: DbCommand,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Create all tables and indexes.
    Create,
    /// Drop all tables.
    Drop {
        /// Confirm the destructive operation.
        #[arg(long)]
        yes: bool,
    },
    /// Drop and recreate all tables. Deletes all data.
    Reset {
        /// Confirm the destructive operation.
        #[arg(long)]
        yes: bool,
    },
    /// Show row counts per table.
    Status,
}

async fn connect(config: &AppConfig) -> anyhow::Result<DatabaseConnection> {
    Database::connect(config.db.url())
        .await
        .with_context(|| format!("connecting to {}:{}", config.db.host, config.db.port))
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let db = connect(&config).await?;
    let addr = format!("0.0.0.0:{}", config.port);
    let app = api::router(AppState {
        db,
        config: config.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("agent-trace-service listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {e}");
        return;
    }
    tracing::info!("shutdown signal received");
}

async fn run_db_command(config: AppConfig, action: DbCommand) -> anyhow::Result<()> {
    let db = connect(&config).await?;
    match action {
        DbCommand::Create => {
            schema::create_tables(&db).await?;
            println!("Tables created successfully.");
        }
        DbCommand::Drop { yes } => {
            if !yes {
                anyhow::bail!("refusing to drop tables without --yes");
            }
            schema::drop_tables(&db).await?;
            println!("All tables dropped.");
        }
        DbCommand::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to reset the database without --yes");
            }
            schema::reset_tables(&db).await?;
            println!("Database reset complete.");
        }
        DbCommand::Status => {
            println!("Database status:\n");
            for (table, count) in schema::table_status(&db).await? {
                match count {
                    Some(count) => println!("  {table}: {count} rows"),
                    None => println!("  {table}: table does not exist"),
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Db { action } => run_db_command(config, action).await,
    }
}
