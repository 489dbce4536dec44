use tracing::{error, info, instrument, warn};

use super::{
    dto::{CreateUserRequest, CreatedUser},
    repo_types::NewPersonWithProfiles,
};
use crate::{
    auth::{
        password::check_password,
        provider::{is_valid_email, normalize_email, IdentityRequest},
        Role,
    },
    error::{AppError, AppResult},
    state::AppState,
};

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Checks the payload and returns the parsed roles, or every problem found.
pub fn validate(req: &CreateUserRequest) -> Result<Vec<Role>, Vec<String>> {
    let mut problems = Vec::new();

    if !is_valid_email(&normalize_email(&req.email)) {
        problems.push("email is invalid".to_string());
    }
    if let Err(problem) = check_password(&req.password) {
        problems.push(problem);
    }

    let p = &req.persona;
    let doc = p.document_number.trim();
    if doc.is_empty() || doc.len() > 12 || !doc.chars().all(|c| c.is_ascii_alphanumeric()) {
        problems.push("persona.document_number must be 1-12 letters or digits".to_string());
    }
    if blank(&p.first_name) {
        problems.push("persona.first_name is required".to_string());
    }
    if blank(&p.last_name) {
        problems.push("persona.last_name is required".to_string());
    }

    let mut roles = Vec::new();
    for raw in &req.roles {
        match raw.parse::<Role>() {
            Ok(role) => roles.push(role),
            Err(e) => problems.push(e.to_string()),
        }
    }
    roles.sort();
    roles.dedup();
    if req.roles.is_empty() {
        problems.push("at least one role is required".to_string());
    }

    for role in Role::ALL {
        let granted = roles.contains(&role);
        match role {
            Role::Patient => match (&req.patient, granted) {
                (None, true) => problems.push("patient profile is required".to_string()),
                (Some(_), false) => {
                    problems.push("patient profile given without the patient role".to_string())
                }
                _ => {}
            },
            Role::MedicalStaff => match (&req.medical_staff, granted) {
                (None, true) => problems.push("medical_staff profile is required".to_string()),
                (Some(_), false) => problems
                    .push("medical_staff profile given without the medical_staff role".to_string()),
                (Some(ms), true) => {
                    if blank(&ms.specialty) {
                        problems.push("medical_staff.specialty is required".to_string());
                    }
                    if blank(&ms.license_number) {
                        problems.push("medical_staff.license_number is required".to_string());
                    }
                }
                (None, false) => {}
            },
            Role::Admin => match (&req.administrative, granted) {
                (None, true) => problems.push("administrative profile is required".to_string()),
                (Some(_), false) => {
                    problems.push("administrative profile given without the admin role".to_string())
                }
                (Some(a), true) => {
                    if blank(&a.area) {
                        problems.push("administrative.area is required".to_string());
                    }
                }
                (None, false) => {}
            },
        }
    }

    if problems.is_empty() {
        Ok(roles)
    } else {
        Err(problems)
    }
}

/// Creates the person, its role profiles and the identity that signs in as it.
///
/// Person and profiles are written together; if the identity cannot be
/// created afterwards the person is removed again.
#[instrument(skip(st, req), fields(email = %req.email))]
pub async fn create_user(st: &AppState, req: CreateUserRequest) -> AppResult<CreatedUser> {
    let roles = validate(&req).map_err(|details| {
        warn!(?details, "create-user payload rejected");
        AppError::Validation {
            message: "Invalid payload".into(),
            details,
        }
    })?;

    let email = normalize_email(&req.email);
    let document_number = req.persona.document_number.trim().to_string();

    if st
        .people
        .find_person_by_document(&document_number)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("Document number already registered".into()));
    }

    let mut persona = req.persona;
    persona.document_number = document_number;

    let created = st
        .people
        .create_person(&NewPersonWithProfiles {
            persona,
            patient: req.patient,
            medical_staff: req.medical_staff,
            administrative: req.administrative,
        })
        .await?;
    let persona_id = created.persona.id;
    let name = created.persona.full_name();

    let identity = match st
        .identity
        .create_identity(IdentityRequest {
            email: email.clone(),
            password: req.password,
            roles,
            persona_id: Some(persona_id),
            display_name: Some(name.clone()),
        })
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!(%persona_id, error = %e, "identity creation failed; removing person");
            if let Err(undo) = st.people.delete_person(persona_id).await {
                error!(%persona_id, error = %undo, "could not remove person after failed identity creation");
            }
            return Err(e);
        }
    };

    info!(user_id = %identity.id, %persona_id, "user created");
    Ok(CreatedUser {
        id: identity.id,
        email,
        name,
        persona_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::people::repo_types::{MedicalStaffProfile, NewPersona, PatientProfile, Sex};
    use time::macros::date;

    fn persona(doc: &str) -> NewPersona {
        NewPersona {
            document_number: doc.into(),
            first_name: "Rosa".into(),
            last_name: "Quispe".into(),
            birth_date: date!(1985 - 04 - 12),
            sex: Sex::Female,
            phone: None,
            email: None,
            address: None,
        }
    }

    fn request(email: &str, doc: &str, roles: &[&str]) -> CreateUserRequest {
        CreateUserRequest {
            email: email.into(),
            password: "Secur3P@ssw0rd!".into(),
            persona: persona(doc),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            patient: roles.contains(&"patient").then(|| PatientProfile {
                insurance_code: Some("ESS-000123".into()),
                blood_type: Some("O+".into()),
                allergies: None,
            }),
            medical_staff: None,
            administrative: None,
        }
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut req = request("not-an-email", "", &["nurse"]);
        req.password = "short".into();
        let problems = validate(&req).unwrap_err();
        assert!(problems.iter().any(|p| p.contains("email")));
        assert!(problems.iter().any(|p| p.contains("password")));
        assert!(problems.iter().any(|p| p.contains("document_number")));
        assert!(problems.iter().any(|p| p.contains("nurse")));
    }

    #[test]
    fn staff_role_requires_its_profile() {
        let req = request("medico@essalud.gob.pe", "40404040", &["medical_staff"]);
        let problems = validate(&req).unwrap_err();
        assert_eq!(problems, vec!["medical_staff profile is required".to_string()]);
    }

    #[test]
    fn patient_role_requires_its_profile() {
        let mut req = request("rosa@essalud.gob.pe", "11111111", &["patient"]);
        req.patient = None;
        let problems = validate(&req).unwrap_err();
        assert_eq!(problems, vec!["patient profile is required".to_string()]);
    }

    #[test]
    fn patient_profile_without_the_role_is_rejected() {
        let mut req = request("medico@essalud.gob.pe", "40404040", &["medical_staff"]);
        req.medical_staff = Some(MedicalStaffProfile {
            specialty: "Cardiología".into(),
            license_number: "CMP-12345".into(),
        });
        req.patient = Some(PatientProfile::default());
        let problems = validate(&req).unwrap_err();
        assert_eq!(
            problems,
            vec!["patient profile given without the patient role".to_string()]
        );
    }

    #[tokio::test]
    async fn creates_person_profiles_and_identity() {
        let st = AppState::fake();
        let mut req = request("medico@essalud.gob.pe", "40404040", &["medical_staff", "patient"]);
        req.medical_staff = Some(MedicalStaffProfile {
            specialty: "Cardiología".into(),
            license_number: "CMP-12345".into(),
        });

        let user = create_user(&st, req).await.unwrap();
        assert_eq!(user.name, "Rosa Quispe");

        let profiles = st.people.profiles_for(user.persona_id).await.unwrap();
        assert!(profiles.patient_id.is_some());
        assert!(profiles.medical_staff_id.is_some());
        assert!(profiles.administrative_id.is_none());

        let identity = st.identity.find(user.id).await.unwrap().unwrap();
        assert_eq!(identity.roles, vec![Role::Patient, Role::MedicalStaff]);
        assert_eq!(identity.persona_id, Some(user.persona_id));
    }

    #[tokio::test]
    async fn duplicate_email_leaves_no_person_behind() {
        let st = AppState::fake();
        create_user(&st, request("rosa@essalud.gob.pe", "11111111", &["patient"]))
            .await
            .unwrap();

        let err = create_user(&st, request("rosa@essalud.gob.pe", "22222222", &["patient"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(st
            .people
            .find_person_by_document("22222222")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_document_is_a_conflict() {
        let st = AppState::fake();
        create_user(&st, request("rosa@essalud.gob.pe", "11111111", &["patient"]))
            .await
            .unwrap();
        let err = create_user(&st, request("otra@essalud.gob.pe", "11111111", &["patient"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
