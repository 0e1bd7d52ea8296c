use crate::{
    models::{NewRecord, ProjectDatabaseRecord},
    source::RecordSource,
    Error, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use qualstat_core::{DatabaseDescriptor, DatabaseDirectory, ExportQuery, ExportStore, PagedSource};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// The service database: registry of per-project database files plus the
/// exportable `records` table.
#[derive(Clone)]
pub struct ServiceDatabase {
    pool: Pool<Sqlite>,
}

impl ServiceDatabase {
    /// Create new database connection
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Connection(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS project_databases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                last_used_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (project_id, file_path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                code TEXT,
                source TEXT,
                quality_score REAL NOT NULL DEFAULT 0,
                quality_level TEXT,
                is_benchmark BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_project_databases_project ON project_databases(project_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_project ON records(project_id)")
            .execute(&self.pool)
            .await?;

        tracing::info!("Database schema initialized");
        Ok(())
    }

    /// Cheap round trip used to tell an unreachable store from an empty one.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(())
    }

    // ========================================================================
    // Project Database Registry
    // ========================================================================

    pub async fn register_database(
        &self,
        project_id: i64,
        name: &str,
        file_path: &str,
    ) -> Result<ProjectDatabaseRecord> {
        let id = sqlx::query(
            r#"
            INSERT INTO project_databases (project_id, name, file_path, is_active, created_at)
            VALUES (?, ?, ?, TRUE, ?)
            "#,
        )
        .bind(project_id)
        .bind(name)
        .bind(file_path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        tracing::info!(
            "Registered database {} ({}) for project {}",
            id,
            file_path,
            project_id
        );

        self.get_database(id).await?.ok_or(Error::DatabaseNotFound(id))
    }

    pub async fn get_database(&self, database_id: i64) -> Result<Option<ProjectDatabaseRecord>> {
        let record = sqlx::query_as::<_, ProjectDatabaseRecord>(
            "SELECT * FROM project_databases WHERE id = ?",
        )
        .bind(database_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn list_project_databases(
        &self,
        project_id: i64,
        active_only: bool,
    ) -> Result<Vec<ProjectDatabaseRecord>> {
        let records = sqlx::query_as::<_, ProjectDatabaseRecord>(
            r#"
            SELECT * FROM project_databases
            WHERE project_id = ? AND (is_active OR NOT ?)
            ORDER BY id
            "#,
        )
        .bind(project_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn set_database_active(
        &self,
        project_id: i64,
        database_id: i64,
        active: bool,
    ) -> Result<ProjectDatabaseRecord> {
        let existing = self
            .get_database(database_id)
            .await?
            .ok_or(Error::DatabaseNotFound(database_id))?;
        if existing.project_id != project_id {
            return Err(Error::ProjectNotFound(project_id));
        }

        sqlx::query("UPDATE project_databases SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(database_id)
            .execute(&self.pool)
            .await?;

        Ok(ProjectDatabaseRecord {
            is_active: active,
            ..existing
        })
    }

    pub async fn mark_used(&self, database_id: i64) -> Result<()> {
        sqlx::query("UPDATE project_databases SET last_used_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(database_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub async fn insert_record(&self, record: &NewRecord) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO records (
                project_id, name, code, source,
                quality_score, quality_level, is_benchmark
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.project_id)
        .bind(&record.name)
        .bind(&record.code)
        .bind(&record.source)
        .bind(record.quality_score)
        .bind(&record.quality_level)
        .bind(record.is_benchmark)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }
}

#[async_trait]
impl DatabaseDirectory for ServiceDatabase {
    async fn list_databases(
        &self,
        project_id: i64,
        active_only: bool,
    ) -> qualstat_core::Result<Vec<DatabaseDescriptor>> {
        let records = self.list_project_databases(project_id, active_only).await?;
        Ok(records.into_iter().map(DatabaseDescriptor::from).collect())
    }

    async fn set_active(
        &self,
        project_id: i64,
        database_id: i64,
        active: bool,
    ) -> qualstat_core::Result<DatabaseDescriptor> {
        let record = self
            .set_database_active(project_id, database_id, active)
            .await?;
        Ok(record.into())
    }
}

#[async_trait]
impl ExportStore for ServiceDatabase {
    async fn open(&self, query: &ExportQuery) -> qualstat_core::Result<Box<dyn PagedSource>> {
        self.ping().await?;
        Ok(Box::new(RecordSource::new(self.pool.clone(), query.clone())))
    }
}
