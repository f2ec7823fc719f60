//! Minimal SQLite package store.
//!
//! Just enough package surface for the sync engine: version diffing,
//! idempotent publishes, and dist-tags. Manifest validation and semver
//! rules live in the package-manager service in front of this store, not
//! here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use packdock_core::ports::{
    DistStore, PackageManager, PackageSummary, PublishOutcome, PublishVersionCmd,
    RepositoryError, VersionFileRecord, VersionFileRepository,
};

use super::{is_unique_violation, storage_err};

pub struct SqlitePackageRepository {
    pool: SqlitePool,
    dist: Arc<dyn DistStore>,
}

impl SqlitePackageRepository {
    pub fn new(pool: SqlitePool, dist: Arc<dyn DistStore>) -> Self {
        Self { pool, dist }
    }

    fn split_fullname(fullname: &str) -> (String, String) {
        fullname
            .strip_prefix('@')
            .and_then(|rest| rest.split_once('/'))
            .map_or_else(
                || (String::new(), fullname.to_string()),
                |(scope, name)| (format!("@{scope}"), name.to_string()),
            )
    }
}

#[async_trait]
impl PackageManager for SqlitePackageRepository {
    async fn find_package(
        &self,
        fullname: &str,
    ) -> Result<Option<PackageSummary>, RepositoryError> {
        let row = sqlx::query("SELECT package_id, scope, name, fullname FROM packages WHERE fullname = ?")
            .bind(fullname)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|row| {
            Ok(PackageSummary {
                package_id: row.try_get("package_id").map_err(storage_err)?,
                scope: row.try_get("scope").map_err(storage_err)?,
                name: row.try_get("name").map_err(storage_err)?,
                fullname: row.try_get("fullname").map_err(storage_err)?,
            })
        })
        .transpose()
    }

    async fn list_published_versions(
        &self,
        fullname: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT version FROM package_versions WHERE fullname = ? ORDER BY id ASC",
        )
        .bind(fullname)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter()
            .map(|row| row.try_get("version").map_err(storage_err))
            .collect()
    }

    async fn publish_version(
        &self,
        cmd: &PublishVersionCmd,
    ) -> Result<PublishOutcome, RepositoryError> {
        let (scope, name) = Self::split_fullname(&cmd.fullname);
        sqlx::query(
            "INSERT OR IGNORE INTO packages (package_id, scope, name, fullname) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().simple().to_string())
        .bind(scope)
        .bind(name)
        .bind(&cmd.fullname)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let package_version_id = Uuid::new_v4().simple().to_string();
        let tar_dist_path = format!("/packages/{}/{}/tar.tgz", cmd.fullname, cmd.version);
        let manifest = serde_json::to_string(&cmd.manifest)
            .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let inserted = sqlx::query(
            "INSERT INTO package_versions (package_version_id, fullname, version, manifest, \
             tar_dist_path, published_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&package_version_id)
        .bind(&cmd.fullname)
        .bind(&cmd.version)
        .bind(manifest)
        .bind(&tar_dist_path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Ok(PublishOutcome::AlreadyExists),
            Err(err) => return Err(storage_err(err)),
        }

        self.dist.save_file(&tar_dist_path, &cmd.tarball).await?;
        Ok(PublishOutcome::Published {
            package_version_id,
            tar_dist_path,
        })
    }

    async fn find_version_by_tag(
        &self,
        fullname: &str,
        tag: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT version FROM package_tags WHERE fullname = ? AND tag = ?")
            .bind(fullname)
            .bind(tag)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|row| row.try_get("version").map_err(storage_err))
            .transpose()
    }

    async fn set_tag(
        &self,
        fullname: &str,
        tag: &str,
        version: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO package_tags (fullname, tag, version) VALUES (?, ?, ?) \
             ON CONFLICT (fullname, tag) DO UPDATE SET version = excluded.version",
        )
        .bind(fullname)
        .bind(tag)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

pub struct SqliteVersionFileRepository {
    pool: SqlitePool,
}

impl SqliteVersionFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VersionFileRepository for SqliteVersionFileRepository {
    async fn has_files(&self, package_version_id: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM version_files WHERE package_version_id = ?) AS present",
        )
        .bind(package_version_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        row.try_get::<bool, _>("present").map_err(storage_err)
    }

    async fn find_file(
        &self,
        package_version_id: &str,
        directory: &str,
        name: &str,
    ) -> Result<Option<VersionFileRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT file_id, package_version_id, directory, name, dist_path, size, \
             content_type, created_at FROM version_files \
             WHERE package_version_id = ? AND directory = ? AND name = ?",
        )
        .bind(package_version_id)
        .bind(directory)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(|row| {
            Ok(VersionFileRecord {
                file_id: row.try_get("file_id").map_err(storage_err)?,
                package_version_id: row.try_get("package_version_id").map_err(storage_err)?,
                directory: row.try_get("directory").map_err(storage_err)?,
                name: row.try_get("name").map_err(storage_err)?,
                dist_path: row.try_get("dist_path").map_err(storage_err)?,
                size: row
                    .try_get::<i64, _>("size")
                    .map_err(storage_err)?
                    .try_into()
                    .unwrap_or(0),
                content_type: row.try_get("content_type").map_err(storage_err)?,
                created_at: row.try_get("created_at").map_err(storage_err)?,
            })
        })
        .transpose()
    }

    async fn create_file(&self, record: &VersionFileRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO version_files (file_id, package_version_id, directory, name, \
             dist_path, size, content_type, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.file_id)
        .bind(&record.package_version_id)
        .bind(&record.directory)
        .bind(&record.name)
        .bind(&record.dist_path)
        .bind(i64::try_from(record.size).unwrap_or(i64::MAX))
        .bind(&record.content_type)
        .bind(record.created_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(RepositoryError::AlreadyExists(format!(
                "{}:{}{}",
                record.package_version_id, record.directory, record.name
            ))),
            Err(err) => Err(storage_err(err)),
        }
    }
}
