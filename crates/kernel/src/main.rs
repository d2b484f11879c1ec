//! Folio CMS maintenance CLI
//!
//! Runs content pipeline maintenance operations against PostgreSQL.
//!
//! Usage:
//!   folio migrate
//!   folio republish-all --user 0

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use folio_kernel::config::Config;
use folio_kernel::content::{ContentService, ContentTypeRegistry};
use folio_kernel::db;
use folio_kernel::file::LocalMediaFileSystem;
use folio_kernel::persistence::PgUnitOfWorkProvider;
use folio_kernel::services::{AuditService, ScheduledPublishingService};
use folio_kernel::tap::TapDispatcher;

/// Folio content maintenance.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations.
    Migrate,

    /// Publish every valid root item and its descendants.
    RepublishAll {
        /// Id of the user performing the operation.
        #[arg(long, default_value = "0")]
        user: i32,
    },

    /// Permanently delete everything in the recycle bin.
    EmptyRecycleBin,

    /// Release and expire content whose schedule has passed.
    ProcessSchedule {
        /// Id of the user performing the operation.
        #[arg(long, default_value = "0")]
        user: i32,
    },

    /// Delete audit entries older than the retention period.
    AuditCleanup {
        /// Retention in days (defaults to AUDIT_RETENTION_DAYS).
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let pool = db::create_pool(&config)
        .await
        .context("failed to create database pool")?;
    if !db::check_health(&pool).await {
        anyhow::bail!("database is not reachable");
    }

    if let Command::Migrate = cli.command {
        return db::run_migrations(&pool).await;
    }

    let registry = ContentTypeRegistry::new();
    let loaded = registry
        .load_from_db(&pool)
        .await
        .context("failed to load content types")?;
    info!(content_types = loaded, "content types loaded");

    let audit = Arc::new(AuditService::new(pool.clone()));
    let content = ContentService::new(
        Arc::new(PgUnitOfWorkProvider::new(pool.clone(), Arc::new(registry.clone()))),
        Arc::new(registry),
        Arc::new(TapDispatcher::new()),
        audit.clone(),
    )
    .with_media(Arc::new(LocalMediaFileSystem::new(
        config.media_dir.clone(),
        config.media_url.clone(),
    )));

    match cli.command {
        Command::Migrate => {}
        Command::RepublishAll { user } => {
            let outcomes = content.republish_all(user).await?;
            let published = outcomes.iter().filter(|o| o.status.is_success()).count();
            info!(published, attempted = outcomes.len(), "republish finished");
        }
        Command::EmptyRecycleBin => {
            let deleted = content.empty_recycle_bin().await?;
            info!(deleted, "recycle bin emptied");
        }
        Command::ProcessSchedule { user } => {
            let report = ScheduledPublishingService::new(content)
                .process(Utc::now(), user)
                .await?;
            info!(
                released = report.released,
                expired = report.expired,
                "schedule processed"
            );
        }
        Command::AuditCleanup { days } => {
            let removed = audit
                .cleanup(days.unwrap_or(config.audit_retention_days))
                .await?;
            info!(removed, "audit log cleaned up");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
