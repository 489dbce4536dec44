use anyhow::Context;
use async_trait::async_trait;
use sqlx::types::Json;
use uuid::Uuid;

use super::{
    records::RecordKind,
    repo_types::{
        AppointmentRow, AppointmentStatus, NewAppointment, NewRecord, RecordFilter, RecordRow, Scope,
        ServiceInstanceRow,
    },
};
use crate::db::PgStore;

#[async_trait]
pub trait ClinicalStore: Send + Sync {
    async fn insert_appointment(&self, new: &NewAppointment) -> anyhow::Result<AppointmentRow>;
    async fn find_appointment(&self, id: Uuid) -> anyhow::Result<Option<AppointmentRow>>;
    async fn list_appointments(&self, scope: Scope) -> anyhow::Result<Vec<AppointmentRow>>;

    async fn insert_service_instance(
        &self,
        appointment_id: Uuid,
        kind: RecordKind,
    ) -> anyhow::Result<ServiceInstanceRow>;
    async fn find_service_instance(&self, id: Uuid) -> anyhow::Result<Option<ServiceInstanceRow>>;
    async fn delete_service_instance(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Writes the specialised row; returns its id.
    async fn insert_record(&self, new: &NewRecord) -> anyhow::Result<Uuid>;
    /// Removes the specialised rows of `kind` under a service instance.
    async fn delete_records(&self, service_instance_id: Uuid, kind: RecordKind) -> anyhow::Result<u64>;
    /// Joined record views visible under `scope`, newest first.
    async fn list_records(&self, scope: Scope, filter: RecordFilter) -> anyhow::Result<Vec<RecordRow>>;
}

const APPOINTMENT_COLUMNS: &str =
    "id, patient_id, staff_id, scheduled_at, reason, status, created_at";

fn scope_binds(scope: Scope) -> (Option<Uuid>, Option<Uuid>) {
    match scope {
        Scope::Patient(id) => (Some(id), None),
        Scope::MedicalStaff(id) => (None, Some(id)),
        Scope::Admin => (None, None),
    }
}

fn records_union(kind: Option<RecordKind>) -> String {
    let kinds: Vec<RecordKind> = match kind {
        Some(k) => vec![k],
        None => RecordKind::ALL.to_vec(),
    };
    kinds
        .iter()
        .map(|k| {
            format!(
                "SELECT id AS record_id, service_instance_id, '{}' AS kind, data, created_at FROM {}",
                k.as_str(),
                k.table()
            )
        })
        .collect::<Vec<_>>()
        .join("\n UNION ALL ")
}

#[async_trait]
impl ClinicalStore for PgStore {
    async fn insert_appointment(&self, new: &NewAppointment) -> anyhow::Result<AppointmentRow> {
        let row = sqlx::query_as::<_, AppointmentRow>(&format!(
            r#"
            INSERT INTO appointments (patient_id, staff_id, scheduled_at, reason, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(new.patient_id)
        .bind(new.staff_id)
        .bind(new.scheduled_at)
        .bind(&new.reason)
        .bind(AppointmentStatus::Scheduled.as_str())
        .fetch_one(&self.db)
        .await
        .context("insert appointment")?;
        Ok(row)
    }

    async fn find_appointment(&self, id: Uuid) -> anyhow::Result<Option<AppointmentRow>> {
        let row = sqlx::query_as::<_, AppointmentRow>(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find appointment")?;
        Ok(row)
    }

    async fn list_appointments(&self, scope: Scope) -> anyhow::Result<Vec<AppointmentRow>> {
        let (patient_id, staff_id) = scope_binds(scope);
        let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
              FROM appointments
             WHERE ($1::uuid IS NULL OR patient_id = $1)
               AND ($2::uuid IS NULL OR staff_id = $2)
             ORDER BY scheduled_at DESC
            "#
        ))
        .bind(patient_id)
        .bind(staff_id)
        .fetch_all(&self.db)
        .await
        .context("list appointments")?;
        Ok(rows)
    }

    async fn insert_service_instance(
        &self,
        appointment_id: Uuid,
        kind: RecordKind,
    ) -> anyhow::Result<ServiceInstanceRow> {
        let row = sqlx::query_as::<_, ServiceInstanceRow>(
            r#"
            INSERT INTO service_instances (appointment_id, kind)
            VALUES ($1, $2)
            RETURNING id, appointment_id, kind, created_at
            "#,
        )
        .bind(appointment_id)
        .bind(kind.as_str())
        .fetch_one(&self.db)
        .await
        .context("insert service instance")?;
        Ok(row)
    }

    async fn find_service_instance(&self, id: Uuid) -> anyhow::Result<Option<ServiceInstanceRow>> {
        let row = sqlx::query_as::<_, ServiceInstanceRow>(
            "SELECT id, appointment_id, kind, created_at FROM service_instances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find service instance")?;
        Ok(row)
    }

    async fn delete_service_instance(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM service_instances WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete service instance")?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_record(&self, new: &NewRecord) -> anyhow::Result<Uuid> {
        let kind = new.record.kind();
        let data = new.record.data_json()?;
        let id = sqlx::query_scalar::<_, Uuid>(&format!(
            "INSERT INTO {} (service_instance_id, data) VALUES ($1, $2) RETURNING id",
            kind.table()
        ))
        .bind(new.service_instance_id)
        .bind(Json(data))
        .fetch_one(&self.db)
        .await
        .with_context(|| format!("insert {kind} record"))?;
        Ok(id)
    }

    async fn delete_records(&self, service_instance_id: Uuid, kind: RecordKind) -> anyhow::Result<u64> {
        let res = sqlx::query(&format!(
            "DELETE FROM {} WHERE service_instance_id = $1",
            kind.table()
        ))
        .bind(service_instance_id)
        .execute(&self.db)
        .await
        .with_context(|| format!("delete {kind} records"))?;
        Ok(res.rows_affected())
    }

    async fn list_records(&self, scope: Scope, filter: RecordFilter) -> anyhow::Result<Vec<RecordRow>> {
        let (patient_id, staff_id) = scope_binds(scope);
        let sql = format!(
            r#"
            WITH recs AS (
                {recs_sql}
            )
            SELECT r.record_id, r.service_instance_id, r.kind, r.data, r.created_at,
                   a.id AS appointment_id, a.scheduled_at,
                   a.patient_id, pp.first_name || ' ' || pp.last_name AS patient_name,
                   a.staff_id,   sp.first_name || ' ' || sp.last_name AS staff_name
              FROM recs r
              JOIN service_instances si ON si.id = r.service_instance_id
              JOIN appointments a       ON a.id = si.appointment_id
              JOIN patients pt          ON pt.id = a.patient_id
              JOIN personas pp          ON pp.id = pt.persona_id
              JOIN medical_staff ms     ON ms.id = a.staff_id
              JOIN personas sp          ON sp.id = ms.persona_id
             WHERE ($1::uuid IS NULL OR a.patient_id = $1)
               AND ($2::uuid IS NULL OR a.patient_id IN (
                        SELECT patient_id FROM appointments WHERE staff_id = $2))
               AND ($3::uuid IS NULL OR r.service_instance_id = $3)
             ORDER BY r.created_at DESC
            "#,
            recs_sql = records_union(filter.kind)
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(patient_id)
            .bind(staff_id)
            .bind(filter.service_instance_id)
            .fetch_all(&self.db)
            .await
            .context("list clinical records")?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_covers_every_table_without_a_kind() {
        let sql = records_union(None);
        for kind in RecordKind::ALL {
            assert!(sql.contains(&format!("FROM {}", kind.table())));
        }
        assert_eq!(sql.matches("UNION ALL").count(), RecordKind::ALL.len() - 1);
    }

    #[test]
    fn union_narrows_to_one_table() {
        let sql = records_union(Some(RecordKind::Surgery));
        assert!(sql.contains("FROM surgeries"));
        assert!(!sql.contains("UNION"));
    }
}
