use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[serde(alias = "M")]
    Male,
    #[serde(alias = "F")]
    Female,
}

impl Sex {
    pub fn as_str(self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }
}

/// Person record shared by patients, medical staff and administrative users.
#[derive(Debug, Clone, FromRow)]
pub struct PersonaRow {
    pub id: Uuid,
    pub document_number: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: Date,
    pub sex: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub created_at: OffsetDateTime,
}

impl PersonaRow {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPersona {
    pub document_number: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(with = "iso_date")]
    pub birth_date: Date,
    pub sex: Sex,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientProfile {
    #[serde(default)]
    pub insurance_code: Option<String>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalStaffProfile {
    pub specialty: String,
    /// Professional licence (CMP) number.
    pub license_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdministrativeProfile {
    pub area: String,
}

/// Person plus the role profiles to create with it.
#[derive(Debug, Clone)]
pub struct NewPersonWithProfiles {
    pub persona: NewPersona,
    pub patient: Option<PatientProfile>,
    pub medical_staff: Option<MedicalStaffProfile>,
    pub administrative: Option<AdministrativeProfile>,
}

/// Ids created for a person and its profiles.
#[derive(Debug, Clone)]
pub struct CreatedPerson {
    pub persona: PersonaRow,
    pub patient_id: Option<Uuid>,
    pub medical_staff_id: Option<Uuid>,
    pub administrative_id: Option<Uuid>,
}

/// Profile ids attached to one person.
#[derive(Debug, Clone, Copy, Default, FromRow)]
pub struct PersonaProfiles {
    pub patient_id: Option<Uuid>,
    pub medical_staff_id: Option<Uuid>,
    pub administrative_id: Option<Uuid>,
}
