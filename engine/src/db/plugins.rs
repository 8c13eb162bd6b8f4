/// Plugin registry operations
///
/// Registered plugin builds and their tenant installations. All queries use
/// bound parameters.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::PluginError;
use sdk::manifest::{PluginDeclaration, PluginUniqueIdentifier};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::installer::PluginStore;

/// Install type of packages extracted onto the local filesystem
pub const INSTALL_TYPE_LOCAL: &str = "local";

/// Registered plugin build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: i64,
    /// `author/name`
    pub plugin_id: String,
    pub plugin_unique_identifier: String,
    pub declaration: PluginDeclaration,
    pub install_type: String,
    pub created_at: i64,
}

/// A tenant's association with a registered plugin build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub id: i64,
    pub tenant_id: String,
    pub plugin_unique_identifier: String,
    pub plugin_id: String,
    pub created_at: i64,
}

/// Plugin repository for database operations
#[derive(Clone)]
pub struct PluginRepository {
    pool: SqlitePool,
}

impl PluginRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a plugin build; registering the same identifier again is a no-op
    pub async fn register_plugin(
        &self,
        identifier: &PluginUniqueIdentifier,
        declaration: &PluginDeclaration,
        install_type: &str,
    ) -> Result<PluginRecord> {
        let now = chrono::Utc::now().timestamp();
        let declaration_json = declaration
            .to_json()
            .context("Failed to encode plugin declaration")?;

        sqlx::query(
            "INSERT INTO plugins (plugin_id, plugin_unique_identifier, declaration, install_type, created_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT(plugin_unique_identifier) DO NOTHING",
        )
        .bind(identifier.plugin_id())
        .bind(identifier.as_str())
        .bind(&declaration_json)
        .bind(install_type)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to register plugin")?;

        self.get_plugin(identifier)
            .await?
            .context("Registered plugin disappeared")
    }

    /// Get a plugin build by unique identifier
    pub async fn get_plugin(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<Option<PluginRecord>> {
        let row = sqlx::query(
            "SELECT id, plugin_id, plugin_unique_identifier, declaration, install_type, created_at FROM plugins WHERE plugin_unique_identifier = ?",
        )
        .bind(identifier.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch plugin")?;

        row.as_ref().map(plugin_from_row).transpose()
    }

    /// Associate a tenant with a registered build; idempotent per tenant
    pub async fn create_installation(
        &self,
        tenant_id: &str,
        plugin: &PluginRecord,
    ) -> Result<InstallationRecord> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO installations (tenant_id, plugin_unique_identifier, plugin_id, created_at) VALUES (?, ?, ?, ?) ON CONFLICT(tenant_id, plugin_unique_identifier) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(&plugin.plugin_unique_identifier)
        .bind(&plugin.plugin_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create installation")?;

        let row = sqlx::query(
            "SELECT id, tenant_id, plugin_unique_identifier, plugin_id, created_at FROM installations WHERE tenant_id = ? AND plugin_unique_identifier = ?",
        )
        .bind(tenant_id)
        .bind(&plugin.plugin_unique_identifier)
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch installation")?;

        Ok(installation_from_row(&row))
    }

    /// All installations of a tenant, oldest first
    pub async fn list_installations(&self, tenant_id: &str) -> Result<Vec<InstallationRecord>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, plugin_unique_identifier, plugin_id, created_at FROM installations WHERE tenant_id = ? ORDER BY id ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch installations")?;

        Ok(rows.iter().map(installation_from_row).collect())
    }
}

fn plugin_from_row(r: &SqliteRow) -> Result<PluginRecord> {
    let declaration: String = r.get("declaration");
    Ok(PluginRecord {
        id: r.get("id"),
        plugin_id: r.get("plugin_id"),
        plugin_unique_identifier: r.get("plugin_unique_identifier"),
        declaration: PluginDeclaration::from_json(&declaration)
            .context("Stored plugin declaration is corrupt")?,
        install_type: r.get("install_type"),
        created_at: r.get("created_at"),
    })
}

fn installation_from_row(r: &SqliteRow) -> InstallationRecord {
    InstallationRecord {
        id: r.get("id"),
        tenant_id: r.get("tenant_id"),
        plugin_unique_identifier: r.get("plugin_unique_identifier"),
        plugin_id: r.get("plugin_id"),
        created_at: r.get("created_at"),
    }
}

fn database_error(e: anyhow::Error) -> PluginError {
    PluginError::Database(format!("{:#}", e))
}

#[async_trait]
impl PluginStore for PluginRepository {
    async fn get_plugin(
        &self,
        identifier: &PluginUniqueIdentifier,
    ) -> Result<Option<PluginRecord>, PluginError> {
        PluginRepository::get_plugin(self, identifier)
            .await
            .map_err(database_error)
    }

    async fn register_plugin(
        &self,
        identifier: &PluginUniqueIdentifier,
        declaration: &PluginDeclaration,
    ) -> Result<PluginRecord, PluginError> {
        PluginRepository::register_plugin(self, identifier, declaration, INSTALL_TYPE_LOCAL)
            .await
            .map_err(database_error)
    }

    async fn create_installation(
        &self,
        tenant_id: &str,
        plugin: &PluginRecord,
    ) -> Result<InstallationRecord, PluginError> {
        PluginRepository::create_installation(self, tenant_id, plugin)
            .await
            .map_err(database_error)
    }
}
