use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::{AdministrativeProfile, MedicalStaffProfile, NewPersona, PatientProfile};

/// Body of `POST /create-user`.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub persona: NewPersona,
    /// Role names; parsed during validation so every bad entry is reported.
    pub roles: Vec<String>,
    #[serde(default)]
    pub patient: Option<PatientProfile>,
    #[serde(default)]
    pub medical_staff: Option<MedicalStaffProfile>,
    #[serde(default)]
    pub administrative: Option<AdministrativeProfile>,
}

#[derive(Debug, Serialize)]
pub struct CreatedUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub persona_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub success: bool,
    pub user: CreatedUser,
}
