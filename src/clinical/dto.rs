use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    records::{ClinicalRecord, RecordKind},
    repo_types::{AppointmentRow, RecordRow},
};
use crate::auth::Role;

/// `?role=` selects the acting role; `?kind=` narrows record listings.
#[derive(Debug, Default, Deserialize)]
pub struct ClinicalQuery {
    pub role: Option<Role>,
    pub kind: Option<RecordKind>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentView {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub reason: Option<String>,
    pub status: String,
}

impl From<AppointmentRow> for AppointmentView {
    fn from(row: AppointmentRow) -> Self {
        Self {
            id: row.id,
            patient_id: row.patient_id,
            staff_id: row.staff_id,
            scheduled_at: row.scheduled_at,
            reason: row.reason,
            status: row.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PartyRef {
    pub id: Uuid,
    pub name: String,
}

/// A clinical record as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ClinicalRecordView {
    pub service_instance_id: Uuid,
    pub record_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub appointment_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub patient: PartyRef,
    pub staff: PartyRef,
    pub record: ClinicalRecord,
}

impl TryFrom<RecordRow> for ClinicalRecordView {
    type Error = anyhow::Error;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let kind: RecordKind = row.kind.parse()?;
        let record = ClinicalRecord::from_parts(kind, row.data.0)?;
        Ok(Self {
            service_instance_id: row.service_instance_id,
            record_id: row.record_id,
            recorded_at: row.created_at,
            appointment_id: row.appointment_id,
            scheduled_at: row.scheduled_at,
            patient: PartyRef {
                id: row.patient_id,
                name: row.patient_name,
            },
            staff: PartyRef {
                id: row.staff_id,
                name: row.staff_name,
            },
            record,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RecordList {
    pub count: usize,
    pub records: Vec<ClinicalRecordView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;

    fn row(kind: &str, data: serde_json::Value) -> RecordRow {
        RecordRow {
            record_id: Uuid::new_v4(),
            service_instance_id: Uuid::new_v4(),
            kind: kind.into(),
            data: Json(data),
            created_at: OffsetDateTime::UNIX_EPOCH,
            appointment_id: Uuid::new_v4(),
            scheduled_at: OffsetDateTime::UNIX_EPOCH,
            patient_id: Uuid::new_v4(),
            patient_name: "Rosa Quispe".into(),
            staff_id: Uuid::new_v4(),
            staff_name: "Luis Huamán".into(),
        }
    }

    #[test]
    fn row_maps_to_typed_view() {
        let view = ClinicalRecordView::try_from(row(
            "exam",
            serde_json::json!({ "exam_type": "Hemograma", "result": "normal" }),
        ))
        .unwrap();
        assert_eq!(view.record.kind(), RecordKind::Exam);
        assert_eq!(view.patient.name, "Rosa Quispe");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["record"]["kind"], "exam");
        assert_eq!(json["record"]["data"]["exam_type"], "Hemograma");
        assert_eq!(json["recorded_at"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn unknown_kind_or_bad_payload_fails_mapping() {
        assert!(ClinicalRecordView::try_from(row("xray", serde_json::json!({}))).is_err());
        assert!(ClinicalRecordView::try_from(row("exam", serde_json::json!({ "result": 1 }))).is_err());
    }
}
