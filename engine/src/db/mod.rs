//! SQLite store for registered plugin builds and tenant installations
//!
//! The schema lives in `engine/migrations` and is applied with the sqlx
//! migrator when the store is opened.
use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use tracing::info;

pub mod plugins;

pub use plugins::{InstallationRecord, PluginRecord, PluginRepository, INSTALL_TYPE_LOCAL};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Pool over the plugd database file
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `db_path` and bring its schema up to date.
    ///
    /// Foreign keys are enforced on every connection so an installation can
    /// only reference a registered build.
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        MIGRATOR
            .run(&pool)
            .await
            .context("Failed to apply database migrations")?;
        info!("Plugin database ready at {}", db_path.display());

        Ok(Self { pool })
    }

    /// Repository over the plugin and installation tables
    pub fn plugins(&self) -> PluginRepository {
        PluginRepository::new(self.pool.clone())
    }

    /// Wait for in-flight queries, then close every connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}
