//! SQLite-backed object API.
//!
//! One row per physical record. Labels and entries are JSON columns; label
//! selectors compile to `json_extract` predicates, and conditional writes are
//! `UPDATE`/`DELETE` statements guarded by `resource_version`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{LabelSelector, ObjectApi, ObjectApiError, PhysicalRecord, ResourceEntry};
use crate::error::StoreError;
use crate::migrations;

#[derive(sqlx::FromRow)]
struct RecordRow {
    name: String,
    uid: String,
    resource_version: i64,
    labels: String,
    entries: String,
}

impl TryFrom<RecordRow> for PhysicalRecord {
    type Error = ObjectApiError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let labels: BTreeMap<String, String> = serde_json::from_str(&row.labels)?;
        let entries: Vec<ResourceEntry> = serde_json::from_str(&row.entries)?;
        Ok(PhysicalRecord {
            name: row.name,
            uid: row.uid,
            resource_version: row.resource_version as u64,
            labels,
            entries,
        })
    }
}

/// SQLite-backed object API scoped to one namespace.
#[derive(Clone)]
pub struct SqliteObjectApi {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteObjectApi {
    /// Create an object API from an existing, migrated pool.
    pub fn new(pool: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    /// Open (creating if needed) a database file and run migrations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let api = SqliteObjectApi::from_path(".data/ucp.db", "ucp-system").await?;
    /// ```
    pub async fn from_path(
        path: impl AsRef<Path>,
        namespace: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::internal(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::internal(
                    "connect",
                    format!("Failed to connect to SQLite at {:?}: {}", path, e),
                )
            })?;

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| StoreError::internal("migrate", format!("Failed to run migrations: {}", e)))?;

        Ok(Self::new(pool, namespace))
    }

    async fn exists(&self, name: &str) -> Result<bool, ObjectApiError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM ucp_resources WHERE namespace = ? AND name = ?")
                .bind(&self.namespace)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Why a guarded write touched no rows.
    async fn miss_reason(&self, name: &str) -> Result<ObjectApiError, ObjectApiError> {
        Ok(if self.exists(name).await? {
            ObjectApiError::Conflict
        } else {
            ObjectApiError::NotFound
        })
    }
}

fn label_path(key: &str) -> String {
    format!("$.\"{}\"", key)
}

#[async_trait]
impl ObjectApi for SqliteObjectApi {
    async fn get(&self, name: &str) -> Result<PhysicalRecord, ObjectApiError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT name, uid, resource_version, labels, entries
            FROM ucp_resources
            WHERE namespace = ? AND name = ?
            "#,
        )
        .bind(&self.namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(ObjectApiError::NotFound)?.try_into()
    }

    async fn create(&self, record: &PhysicalRecord) -> Result<PhysicalRecord, ObjectApiError> {
        let uid = Uuid::new_v4().to_string();
        let labels = serde_json::to_string(&record.labels)?;
        let entries = serde_json::to_string(&record.entries)?;

        let result = sqlx::query(
            r#"
            INSERT INTO ucp_resources (namespace, name, uid, resource_version, labels, entries)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&self.namespace)
        .bind(&record.name)
        .bind(&uid)
        .bind(&labels)
        .bind(&entries)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(PhysicalRecord {
                uid,
                resource_version: 1,
                ..record.clone()
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ObjectApiError::AlreadyExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, record: &PhysicalRecord) -> Result<PhysicalRecord, ObjectApiError> {
        let labels = serde_json::to_string(&record.labels)?;
        let entries = serde_json::to_string(&record.entries)?;

        let result = sqlx::query(
            r#"
            UPDATE ucp_resources
            SET resource_version = resource_version + 1,
                labels = ?,
                entries = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE namespace = ? AND name = ? AND resource_version = ?
            "#,
        )
        .bind(&labels)
        .bind(&entries)
        .bind(&self.namespace)
        .bind(&record.name)
        .bind(record.resource_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.miss_reason(&record.name).await?);
        }

        Ok(PhysicalRecord {
            resource_version: record.resource_version + 1,
            ..record.clone()
        })
    }

    async fn delete(&self, name: &str, resource_version: u64) -> Result<(), ObjectApiError> {
        let result = sqlx::query(
            "DELETE FROM ucp_resources WHERE namespace = ? AND name = ? AND resource_version = ?",
        )
        .bind(&self.namespace)
        .bind(name)
        .bind(resource_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.miss_reason(name).await?);
        }
        Ok(())
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<PhysicalRecord>, ObjectApiError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT name, uid, resource_version, labels, entries FROM ucp_resources WHERE namespace = ",
        );
        builder.push_bind(self.namespace.clone());

        for requirement in &selector.requirements {
            builder.push(" AND json_extract(labels, ");
            builder.push_bind(label_path(&requirement.key));
            builder.push(") IN (");
            let mut values = builder.separated(", ");
            for value in &requirement.values {
                values.push_bind(value.clone());
            }
            values.push_unseparated(")");
        }
        builder.push(" ORDER BY name");

        let rows = builder
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PhysicalRecord::try_from).collect()
    }
}
