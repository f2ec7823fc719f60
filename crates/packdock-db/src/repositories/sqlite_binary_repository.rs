//! SQLite mirrored-binary records.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use packdock_core::ports::{BinaryEntry, BinaryRepository, RepositoryError};

use super::storage_err;

pub struct SqliteBinaryRepository {
    pool: SqlitePool,
}

impl SqliteBinaryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<BinaryEntry, RepositoryError> {
    Ok(BinaryEntry {
        binary_id: row.try_get("binary_id").map_err(storage_err)?,
        category: row.try_get("category").map_err(storage_err)?,
        parent: row.try_get("parent").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        is_dir: row.try_get("is_dir").map_err(storage_err)?,
        size: row
            .try_get::<i64, _>("size")
            .map_err(storage_err)?
            .try_into()
            .unwrap_or(0),
        date: row.try_get("date").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl BinaryRepository for SqliteBinaryRepository {
    async fn find_binary(
        &self,
        category: &str,
        parent: &str,
        name: &str,
    ) -> Result<Option<BinaryEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT binary_id, category, parent, name, is_dir, size, date, created_at, updated_at \
             FROM binaries WHERE category = ? AND parent = ? AND name = ?",
        )
        .bind(category)
        .bind(parent)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn list_binaries(
        &self,
        category: &str,
        parent: &str,
    ) -> Result<Vec<BinaryEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT binary_id, category, parent, name, is_dir, size, date, created_at, updated_at \
             FROM binaries WHERE category = ? AND parent = ? ORDER BY id ASC",
        )
        .bind(category)
        .bind(parent)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn save_binary(&self, entry: &BinaryEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO binaries (binary_id, category, parent, name, is_dir, size, date, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (category, parent, name) DO UPDATE SET \
             is_dir = excluded.is_dir, size = excluded.size, date = excluded.date, \
             updated_at = excluded.updated_at",
        )
        .bind(&entry.binary_id)
        .bind(&entry.category)
        .bind(&entry.parent)
        .bind(&entry.name)
        .bind(entry.is_dir)
        .bind(i64::try_from(entry.size).unwrap_or(i64::MAX))
        .bind(&entry.date)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_pool;

    #[tokio::test]
    async fn save_find_list_roundtrip() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteBinaryRepository::new(pool);

        let dir = BinaryEntry::new("node", "/", "latest/", true, 0, "17-Dec-2021 23:17");
        let file = BinaryEntry::new("node", "/", "index.json", false, 219_862, "17-Dec-2021 23:16");
        repo.save_binary(&dir).await.unwrap();
        repo.save_binary(&file).await.unwrap();

        let found = repo.find_binary("node", "/", "index.json").await.unwrap().unwrap();
        assert!(!found.is_dir);
        assert_eq!(found.size, 219_862);

        let listed = repo.list_binaries("node", "/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(repo.list_binaries("node", "/v18/").await.unwrap().is_empty());
        assert!(repo.find_binary("deno", "/", "index.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_upserts_on_the_natural_key() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteBinaryRepository::new(pool);

        let first = BinaryEntry::new("node", "/", "index.json", false, 100, "17-Dec-2021 23:16");
        repo.save_binary(&first).await.unwrap();

        let refreshed = BinaryEntry::new("node", "/", "index.json", false, 200, "18-Dec-2021 08:00");
        repo.save_binary(&refreshed).await.unwrap();

        let found = repo.find_binary("node", "/", "index.json").await.unwrap().unwrap();
        assert_eq!(found.size, 200);
        assert_eq!(found.date, "18-Dec-2021 08:00");
        // the original row identity is kept
        assert_eq!(found.binary_id, first.binary_id);
        assert_eq!(repo.list_binaries("node", "/").await.unwrap().len(), 1);
    }
}
