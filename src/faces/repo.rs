use anyhow::Context;
use async_trait::async_trait;
use uuid::Uuid;

use super::{descriptor::Descriptor, repo_types::DescriptorRecord};
use crate::db::PgStore;

#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// Appends a capture; existing captures for the user are kept.
    async fn insert_descriptor(
        &self,
        user_id: Uuid,
        descriptor: &Descriptor,
    ) -> anyhow::Result<DescriptorRecord>;
    async fn list_all_descriptors(&self) -> anyhow::Result<Vec<DescriptorRecord>>;
    async fn list_descriptors_for(&self, user_id: Uuid) -> anyhow::Result<Vec<DescriptorRecord>>;
    async fn delete_descriptors_for(&self, user_id: Uuid) -> anyhow::Result<u64>;
}

#[async_trait]
impl DescriptorStore for PgStore {
    async fn insert_descriptor(
        &self,
        user_id: Uuid,
        descriptor: &Descriptor,
    ) -> anyhow::Result<DescriptorRecord> {
        let row = sqlx::query_as::<_, DescriptorRecord>(
            r#"
            INSERT INTO face_descriptors (user_id, descriptor)
            VALUES ($1, $2)
            RETURNING id, user_id, descriptor, created_at
            "#,
        )
        .bind(user_id)
        .bind(descriptor.as_slice())
        .fetch_one(&self.db)
        .await
        .context("insert face descriptor")?;
        Ok(row)
    }

    async fn list_all_descriptors(&self) -> anyhow::Result<Vec<DescriptorRecord>> {
        let rows = sqlx::query_as::<_, DescriptorRecord>(
            r#"
            SELECT id, user_id, descriptor, created_at
              FROM face_descriptors
             ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("list face descriptors")?;
        Ok(rows)
    }

    async fn list_descriptors_for(&self, user_id: Uuid) -> anyhow::Result<Vec<DescriptorRecord>> {
        let rows = sqlx::query_as::<_, DescriptorRecord>(
            r#"
            SELECT id, user_id, descriptor, created_at
              FROM face_descriptors
             WHERE user_id = $1
             ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("list face descriptors by user")?;
        Ok(rows)
    }

    async fn delete_descriptors_for(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM face_descriptors WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("delete face descriptors")?;
        Ok(res.rows_affected())
    }
}
