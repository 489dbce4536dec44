use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::DescriptorRecord;

/// Body of `POST /authenticate-face` and `POST /faces/enroll`.
#[derive(Debug, Deserialize)]
pub struct FaceDescriptorRequest {
    pub descriptor: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct EnrolledFace {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<DescriptorRecord> for EnrolledFace {
    fn from(r: DescriptorRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedFaces {
    pub deleted: u64,
}
