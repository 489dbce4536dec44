use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{AppointmentView, ClinicalRecordView, CreateAppointmentRequest},
    records::{ClinicalRecord, RecordKind},
    repo_types::{AppointmentRow, NewAppointment, NewRecord, RecordFilter, RecordRow, Scope},
};
use crate::{
    auth::{Role, SessionContext},
    error::{AppError, AppResult},
    state::AppState,
};

/// Resolves the caller's active role into the rows it may see.
pub async fn resolve_scope(st: &AppState, ctx: &SessionContext, requested: Option<Role>) -> AppResult<Scope> {
    let role = ctx.active_role(requested)?;
    if role == Role::Admin {
        return Ok(Scope::Admin);
    }

    let persona_id = ctx
        .persona_id
        .ok_or_else(|| AppError::Forbidden(format!("No person linked to act as {role}")))?;
    let profiles = st.people.profiles_for(persona_id).await?;

    match role {
        Role::Patient => profiles
            .patient_id
            .map(Scope::Patient)
            .ok_or_else(|| AppError::Forbidden("No patient profile linked".into())),
        Role::MedicalStaff => profiles
            .medical_staff_id
            .map(Scope::MedicalStaff)
            .ok_or_else(|| AppError::Forbidden("No medical staff profile linked".into())),
        Role::Admin => Ok(Scope::Admin),
    }
}

/// Only the staff member of the appointment, or an admin, writes under it.
fn authorize_write(scope: Scope, appointment: &AppointmentRow) -> AppResult<()> {
    match scope {
        Scope::Admin => Ok(()),
        Scope::MedicalStaff(id) if id == appointment.staff_id => Ok(()),
        Scope::MedicalStaff(_) => Err(AppError::Forbidden(
            "Appointment belongs to another staff member".into(),
        )),
        Scope::Patient(_) => Err(AppError::Forbidden("Patients cannot write clinical records".into())),
    }
}

#[instrument(skip(st, req))]
pub async fn create_appointment(
    st: &AppState,
    scope: Scope,
    req: CreateAppointmentRequest,
) -> AppResult<AppointmentView> {
    if scope != Scope::Admin {
        return Err(AppError::Forbidden("admin role required".into()));
    }
    if !st.people.patient_exists(req.patient_id).await? {
        return Err(AppError::NotFound("Patient not found".into()));
    }
    if !st.people.medical_staff_exists(req.staff_id).await? {
        return Err(AppError::NotFound("Medical staff not found".into()));
    }

    let row = st
        .clinical
        .insert_appointment(&NewAppointment {
            patient_id: req.patient_id,
            staff_id: req.staff_id,
            scheduled_at: req.scheduled_at,
            reason: req.reason,
        })
        .await?;
    info!(appointment_id = %row.id, "appointment created");
    Ok(row.into())
}

pub async fn list_appointments(st: &AppState, scope: Scope) -> AppResult<Vec<AppointmentView>> {
    let rows = st.clinical.list_appointments(scope).await?;
    Ok(rows.into_iter().map(AppointmentView::from).collect())
}

/// Writes a service instance and its specialised row under an appointment.
///
/// If the specialised insert fails the service instance is deleted again.
#[instrument(skip(st, record), fields(kind = %record.kind()))]
pub async fn create_record(
    st: &AppState,
    scope: Scope,
    appointment_id: Uuid,
    record: ClinicalRecord,
) -> AppResult<ClinicalRecordView> {
    record.validate().map_err(|details| AppError::Validation {
        message: "Invalid record".into(),
        details,
    })?;

    let appointment = st
        .clinical
        .find_appointment(appointment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Appointment not found".into()))?;
    authorize_write(scope, &appointment)?;

    let kind = record.kind();
    let instance = st
        .clinical
        .insert_service_instance(appointment_id, kind)
        .await?;

    if let Err(e) = st
        .clinical
        .insert_record(&NewRecord {
            service_instance_id: instance.id,
            record,
        })
        .await
    {
        warn!(service_instance_id = %instance.id, error = %e, "record insert failed; removing service instance");
        if let Err(undo) = st.clinical.delete_service_instance(instance.id).await {
            error!(service_instance_id = %instance.id, error = %undo, "compensation failed");
            return Err(AppError::PartialFailure {
                step: "insert record",
                left_behind: format!("service instance {}", instance.id),
                source: e,
            });
        }
        return Err(AppError::Internal(e));
    }

    info!(service_instance_id = %instance.id, "clinical record created");
    get_record(st, Scope::Admin, instance.id).await
}

/// Deletes the specialised rows, then the service instance.
///
/// The two deletes are not atomic: when the second one fails the service
/// instance stays behind and the call reports a partial failure.
#[instrument(skip(st))]
pub async fn delete_record(st: &AppState, scope: Scope, service_instance_id: Uuid) -> AppResult<()> {
    let instance = st
        .clinical
        .find_service_instance(service_instance_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Record not found".into()))?;
    let appointment = st
        .clinical
        .find_appointment(instance.appointment_id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("service instance without appointment")))?;
    authorize_write(scope, &appointment)?;

    let kind: RecordKind = instance.kind.parse()?;
    let removed = st.clinical.delete_records(instance.id, kind).await?;

    match st.clinical.delete_service_instance(instance.id).await {
        Ok(_) => {
            info!(%service_instance_id, removed, "clinical record deleted");
            Ok(())
        }
        Err(e) => {
            error!(%service_instance_id, error = %e, "service instance left without its record");
            Err(AppError::PartialFailure {
                step: "delete service instance",
                left_behind: format!("service instance {service_instance_id}"),
                source: e,
            })
        }
    }
}

fn into_views(rows: Vec<RecordRow>) -> AppResult<Vec<ClinicalRecordView>> {
    rows.into_iter()
        .map(|row| ClinicalRecordView::try_from(row).map_err(AppError::from))
        .collect()
}

pub async fn list_records(
    st: &AppState,
    scope: Scope,
    kind: Option<RecordKind>,
) -> AppResult<Vec<ClinicalRecordView>> {
    let rows = st
        .clinical
        .list_records(
            scope,
            RecordFilter {
                kind,
                service_instance_id: None,
            },
        )
        .await?;
    into_views(rows)
}

/// One record; anything outside the caller's scope reads as missing.
pub async fn get_record(
    st: &AppState,
    scope: Scope,
    service_instance_id: Uuid,
) -> AppResult<ClinicalRecordView> {
    let rows = st
        .clinical
        .list_records(
            scope,
            RecordFilter {
                kind: None,
                service_instance_id: Some(service_instance_id),
            },
        )
        .await?;
    into_views(rows)?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("Record not found".into()))
}
