use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use super::records::{ClinicalRecord, RecordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Attended,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Attended => "attended",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    pub scheduled_at: OffsetDateTime,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    pub scheduled_at: OffsetDateTime,
    pub reason: Option<String>,
}

/// Generic row every clinical record hangs from.
#[derive(Debug, Clone, FromRow)]
pub struct ServiceInstanceRow {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub kind: String,
    pub created_at: OffsetDateTime,
}

/// Specialised row joined with its service instance, appointment and the
/// names of both parties.
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub record_id: Uuid,
    pub service_instance_id: Uuid,
    pub kind: String,
    pub data: Json<serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub appointment_id: Uuid,
    pub scheduled_at: OffsetDateTime,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub staff_id: Uuid,
    pub staff_name: String,
}

/// Which clinical rows a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only rows about this patient profile.
    Patient(Uuid),
    /// Appointments attended by this staff profile, and every record of the
    /// patients seen in them.
    MedicalStaff(Uuid),
    Admin,
}

impl Scope {
    /// Whether an appointment between these two parties is visible.
    pub fn covers(self, patient_id: Uuid, staff_id: Uuid) -> bool {
        match self {
            Scope::Patient(id) => id == patient_id,
            Scope::MedicalStaff(id) => id == staff_id,
            Scope::Admin => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFilter {
    pub kind: Option<RecordKind>,
    pub service_instance_id: Option<Uuid>,
}

/// Record to write under a fresh service instance.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub service_instance_id: Uuid,
    pub record: ClinicalRecord,
}
