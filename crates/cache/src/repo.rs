//! Key/value access to the `cache_entries` table.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{CacheEntry, EntryRow, StoreKind};
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use time::UtcDateTime;

/// Repository for cache entries.
///
/// Every operation is scoped to one [`StoreKind`]; the two key spaces never
/// share a transaction.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get<T: DeserializeOwned>(&self, store: StoreKind, key: &str) -> Result<Option<CacheEntry<T>>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(store.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(EntryRow::decode).transpose()
    }

    /// Insert or replace the entry under `key`.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        store: StoreKind,
        key: &str,
        data: &T,
        cached_at: UtcDateTime,
    ) -> Result<()> {
        let row = EntryRow::encode(data, cached_at)?;
        sqlx::query(include_str!("../queries/put_entry.sql"))
            .bind(store.as_str())
            .bind(key)
            .bind(row.data)
            .bind(row.cached_at)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Remove every entry of `store`, returning how many were removed.
    pub async fn clear(&self, store: StoreKind) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/clear_store.sql"))
            .bind(store.as_str())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    /// Remove entries of `store` cached strictly before `cutoff`.
    pub async fn prune_older_than(&self, store: StoreKind, cutoff: UtcDateTime) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/prune_older_than.sql"))
            .bind(store.as_str())
            .bind(cutoff.unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self, store: StoreKind) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_entries.sql"))
            .bind(store.as_str())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("entry count".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    async fn repo() -> Repository {
        Repository::from(&Database::connect_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let repo = repo().await;
        let now = UtcDateTime::now();
        repo.put(StoreKind::Artifact, "javaagent/instrumentations/aws-sdk-2.2-374fbfa765af", "X", now).await.unwrap();
        let entry: CacheEntry<String> = repo
            .get(StoreKind::Artifact, "javaagent/instrumentations/aws-sdk-2.2-374fbfa765af")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.data, "X");
        assert_eq!(entry.cached_at.unix_timestamp(), now.unix_timestamp());
    }

    #[tokio::test]
    async fn test_key_spaces_are_independent() {
        let repo = repo().await;
        let now = UtcDateTime::now();
        repo.put(StoreKind::Metadata, "javaagent/versions-index", &1, now).await.unwrap();
        assert!(repo.get::<i32>(StoreKind::Artifact, "javaagent/versions-index").await.unwrap().is_none());

        repo.put(StoreKind::Artifact, "javaagent/versions-index", &2, now).await.unwrap();
        assert_eq!(repo.clear(StoreKind::Artifact).await.unwrap(), 1);
        let entry = repo.get::<i32>(StoreKind::Metadata, "javaagent/versions-index").await.unwrap().unwrap();
        assert_eq!(entry.data, 1);
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let repo = repo().await;
        let now = UtcDateTime::now();
        repo.put(StoreKind::Metadata, "k", &"old", now - Duration::hours(2)).await.unwrap();
        repo.put(StoreKind::Metadata, "k", &"new", now).await.unwrap();
        let entry = repo.get::<String>(StoreKind::Metadata, "k").await.unwrap().unwrap();
        assert_eq!(entry.data, "new");
        assert_eq!(repo.count(StoreKind::Metadata).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_older_than() {
        let repo = repo().await;
        let now = UtcDateTime::now();
        repo.put(StoreKind::Metadata, "old", &0, now - Duration::days(2)).await.unwrap();
        repo.put(StoreKind::Metadata, "fresh", &0, now).await.unwrap();
        repo.put(StoreKind::Artifact, "ancient", &0, now - Duration::days(365)).await.unwrap();

        let removed = repo.prune_older_than(StoreKind::Metadata, now - Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get::<i32>(StoreKind::Metadata, "fresh").await.unwrap().is_some());
        assert!(repo.get::<i32>(StoreKind::Artifact, "ancient").await.unwrap().is_some());
    }
}
