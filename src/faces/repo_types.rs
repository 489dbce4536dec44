use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Stored enrollment capture.
#[derive(Debug, Clone, FromRow)]
pub struct DescriptorRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub descriptor: Vec<f32>,
    pub created_at: OffsetDateTime,
}
