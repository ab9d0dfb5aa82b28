use crate::error::{StorageError, StorageResult};
use crate::models::{NewSample, SampleRecord, TemplateRecord, format_record_id, parse_record_id};
use sqlx::SqlitePool;
use std::future::Future;
use tracing::{debug, info};

/// Repository trait for enrolled fingerprint samples.
///
/// Records are immutable once saved and only ever removed in bulk, so readers
/// and writers may run concurrently. A scan running while a sample is saved
/// may or may not observe the new record.
///
/// Methods return `Send` futures so callers generic over the store can run
/// them on spawned tasks.
pub trait TemplateStore: Send + Sync + 'static {
    /// Persist a sample and return its generated record id (`USER_001`, ...).
    fn save(&self, sample: NewSample) -> impl Future<Output = StorageResult<String>> + Send;

    /// All samples in insertion order, without images.
    fn list_all(&self) -> impl Future<Output = StorageResult<Vec<TemplateRecord>>> + Send;

    /// Number of stored samples.
    fn count(&self) -> impl Future<Output = StorageResult<u64>> + Send;

    /// Remove every sample. Returns the number of rows deleted.
    fn delete_all(&self) -> impl Future<Output = StorageResult<u64>> + Send;

    /// Full sample, image included, by record id.
    fn find(
        &self,
        record_id: &str,
    ) -> impl Future<Output = StorageResult<Option<SampleRecord>>> + Send;
}

/// SQLite implementation of TemplateStore
#[derive(Debug, Clone)]
pub struct SqliteTemplateStore {
    pool: SqlitePool,
}

impl SqliteTemplateStore {
    /// Create a new SQLite template store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl TemplateStore for SqliteTemplateStore {
    async fn save(&self, sample: NewSample) -> StorageResult<String> {
        let result = sqlx::query(
            r#"
            INSERT INTO fingerprints (finger_index, template, image, quality, nfiq, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(i64::from(sample.finger_index))
        .bind(&sample.template)
        .bind(&sample.image)
        .bind(i64::from(sample.quality))
        .bind(i64::from(sample.nfiq))
        .bind(sample.created_at)
        .execute(&self.pool)
        .await?;

        let record_id = format_record_id(result.last_insert_rowid());
        info!(
            record_id = %record_id,
            finger_index = sample.finger_index,
            quality = sample.quality,
            nfiq = sample.nfiq,
            has_image = sample.image.is_some(),
            "Fingerprint sample saved"
        );

        Ok(record_id)
    }

    async fn list_all(&self) -> StorageResult<Vec<TemplateRecord>> {
        let records = sqlx::query_as::<_, TemplateRecord>(
            r#"
            SELECT id, finger_index, template, quality, nfiq, created_at
            FROM fingerprints
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count(&self) -> StorageResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fingerprints")
            .fetch_one(&self.pool)
            .await?;

        u64::try_from(count)
            .map_err(|_| StorageError::Internal(format!("Negative row count: {count}")))
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM fingerprints")
            .execute(&self.pool)
            .await?;

        info!(deleted = result.rows_affected(), "All fingerprint samples deleted");
        Ok(result.rows_affected())
    }

    async fn find(&self, record_id: &str) -> StorageResult<Option<SampleRecord>> {
        let id = parse_record_id(record_id).ok_or_else(|| {
            StorageError::Validation(format!("Malformed record id: {record_id}"))
        })?;

        let record = sqlx::query_as::<_, SampleRecord>(
            r#"
            SELECT id, finger_index, template, image, quality, nfiq, created_at
            FROM fingerprints
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        debug!(record_id, found = record.is_some(), "Sample lookup");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Database;

    async fn store() -> SqliteTemplateStore {
        let db = Database::in_memory().await.unwrap();
        SqliteTemplateStore::new(db.pool().clone())
    }

    fn sample(finger_index: u32, template: &[u8], quality: u8) -> NewSample {
        NewSample::new(finger_index, template.to_vec(), Some(vec![0xEE; 8]), quality, 2).unwrap()
    }

    #[tokio::test]
    async fn test_save_assigns_sequential_ids() {
        let store = store().await;

        assert_eq!(store.save(sample(1, &[1], 70)).await.unwrap(), "USER_001");
        assert_eq!(store.save(sample(2, &[2], 75)).await.unwrap(), "USER_002");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_all_in_insertion_order_without_images() {
        let store = store().await;
        for (i, template) in [[9u8, 9], [8, 8], [7, 7]].iter().enumerate() {
            let slot = u32::try_from(i + 1).unwrap();
            store.save(sample(slot, template, 80)).await.unwrap();
        }

        let records = store.list_all().await.unwrap();
        let ids: Vec<_> = records.iter().map(TemplateRecord::record_id).collect();
        assert_eq!(ids, vec!["USER_001", "USER_002", "USER_003"]);
        assert_eq!(records[1].template, vec![8, 8]);
        assert_eq!(records[2].finger_index, 3);
    }

    #[tokio::test]
    async fn test_find_returns_image() {
        let store = store().await;
        let id = store.save(sample(1, &[1, 2, 3], 91)).await.unwrap();

        let record = store.find(&id).await.unwrap().unwrap();
        assert_eq!(record.template, vec![1, 2, 3]);
        assert_eq!(record.quality, 91);
        assert!(record.has_image());

        assert!(store.find("USER_099").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_rejects_malformed_id() {
        let store = store().await;
        let err = store.find("fingerprint-1").await.unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_all_keeps_ids_monotonic() {
        let store = store().await;
        store.save(sample(1, &[1], 70)).await.unwrap();
        store.save(sample(2, &[2], 70)).await.unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.list_all().await.unwrap().is_empty());

        assert_eq!(store.save(sample(1, &[3], 70)).await.unwrap(), "USER_003");
    }

    #[tokio::test]
    async fn test_save_without_image() {
        let store = store().await;
        let new = NewSample::new(4, vec![5, 5], None, 66, 2).unwrap();
        let id = store.save(new).await.unwrap();

        let record = store.find(&id).await.unwrap().unwrap();
        assert!(!record.has_image());
        assert_eq!(record.finger_index, 4);
    }
}
