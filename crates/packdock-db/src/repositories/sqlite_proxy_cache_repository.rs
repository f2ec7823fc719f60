//! SQLite proxy-cache records.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use packdock_core::ports::{
    ProxyCacheEntry, ProxyCacheRepository, ProxyFileType, RepositoryError,
};

use super::storage_err;

pub struct SqliteProxyCacheRepository {
    pool: SqlitePool,
}

impl SqliteProxyCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<ProxyCacheEntry, RepositoryError> {
    let file_type: String = row.try_get("file_type").map_err(storage_err)?;
    Ok(ProxyCacheEntry {
        fullname: row.try_get("fullname").map_err(storage_err)?,
        file_type: ProxyFileType::from_str(&file_type)
            .map_err(RepositoryError::Serialization)?,
        file_path: row.try_get("file_path").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl ProxyCacheRepository for SqliteProxyCacheRepository {
    async fn list_cached_files(
        &self,
        page_size: usize,
        page_index: usize,
    ) -> Result<Vec<ProxyCacheEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT fullname, file_type, file_path, updated_at FROM proxy_caches \
             ORDER BY id ASC LIMIT ? OFFSET ?",
        )
        .bind(i64::try_from(page_size).unwrap_or(i64::MAX))
        .bind(i64::try_from(page_index * page_size).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn list_cached_files_for_package(
        &self,
        fullname: &str,
    ) -> Result<Vec<ProxyCacheEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT fullname, file_type, file_path, updated_at FROM proxy_caches \
             WHERE fullname = ? ORDER BY id ASC",
        )
        .bind(fullname)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn save_cached_file(&self, entry: &ProxyCacheEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO proxy_caches (fullname, file_type, file_path, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (fullname, file_type) DO UPDATE SET \
             file_path = excluded.file_path, updated_at = excluded.updated_at",
        )
        .bind(&entry.fullname)
        .bind(entry.file_type.file_name())
        .bind(&entry.file_path)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn remove_cached_file(
        &self,
        fullname: &str,
        file_type: &ProxyFileType,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM proxy_caches WHERE fullname = ? AND file_type = ?")
            .bind(fullname)
            .bind(file_type.file_name())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::test_util::test_pool;

    fn entry(fullname: &str, file_type: ProxyFileType) -> ProxyCacheEntry {
        ProxyCacheEntry {
            fullname: fullname.to_string(),
            file_type,
            file_path: format!("/proxy/{fullname}"),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn paging_walks_the_whole_table() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteProxyCacheRepository::new(pool);
        for i in 0..7 {
            repo.save_cached_file(&entry(&format!("pkg-{i}"), ProxyFileType::FullManifest))
                .await
                .unwrap();
        }

        let first = repo.list_cached_files(5, 0).await.unwrap();
        let second = repo.list_cached_files(5, 1).await.unwrap();
        let third = repo.list_cached_files(5, 2).await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 2);
        assert!(third.is_empty());
        assert_eq!(first[0].fullname, "pkg-0");
    }

    #[tokio::test]
    async fn per_package_listing_and_removal() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteProxyCacheRepository::new(pool);
        repo.save_cached_file(&entry("lodash", ProxyFileType::FullManifest))
            .await
            .unwrap();
        repo.save_cached_file(&entry(
            "lodash",
            ProxyFileType::VersionManifest("1.0.0".to_string()),
        ))
        .await
        .unwrap();
        repo.save_cached_file(&entry("react", ProxyFileType::FullManifest))
            .await
            .unwrap();

        let cached = repo.list_cached_files_for_package("lodash").await.unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(
            cached[1].file_type,
            ProxyFileType::VersionManifest("1.0.0".to_string())
        );

        repo.remove_cached_file("lodash", &ProxyFileType::FullManifest)
            .await
            .unwrap();
        assert_eq!(repo.list_cached_files_for_package("lodash").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_refreshes_in_place() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteProxyCacheRepository::new(pool);
        let mut cached = entry("lodash", ProxyFileType::FullManifest);
        repo.save_cached_file(&cached).await.unwrap();

        cached.file_path = "/proxy/lodash/package.json".to_string();
        repo.save_cached_file(&cached).await.unwrap();

        let listed = repo.list_cached_files(10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_path, "/proxy/lodash/package.json");
    }
}
