use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::repo_types::{CreatedPerson, NewPersonWithProfiles, PersonaProfiles, PersonaRow};
use crate::db::PgStore;

#[async_trait]
pub trait PeopleStore: Send + Sync {
    /// Inserts the person and every profile it carries, all or nothing.
    async fn create_person(&self, new: &NewPersonWithProfiles) -> anyhow::Result<CreatedPerson>;
    /// Removes the person together with its profiles.
    async fn delete_person(&self, persona_id: Uuid) -> anyhow::Result<bool>;
    async fn find_person_by_document(&self, document_number: &str) -> anyhow::Result<Option<PersonaRow>>;
    async fn profiles_for(&self, persona_id: Uuid) -> anyhow::Result<PersonaProfiles>;
    async fn patient_exists(&self, patient_id: Uuid) -> anyhow::Result<bool>;
    async fn medical_staff_exists(&self, staff_id: Uuid) -> anyhow::Result<bool>;
}

const PERSONA_COLUMNS: &str = "id, document_number, first_name, last_name, birth_date, sex, \
                               phone, email, address, created_at";

async fn insert_profile_tx(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    persona_id: Uuid,
    binds: &[Option<&str>],
) -> anyhow::Result<Uuid> {
    let mut q = sqlx::query_scalar::<_, Uuid>(sql).bind(persona_id);
    for b in binds {
        q = q.bind(*b);
    }
    let id = q.fetch_one(&mut **tx).await?;
    Ok(id)
}

#[async_trait]
impl PeopleStore for PgStore {
    async fn create_person(&self, new: &NewPersonWithProfiles) -> anyhow::Result<CreatedPerson> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let p = &new.persona;

        let persona = sqlx::query_as::<_, PersonaRow>(&format!(
            r#"
            INSERT INTO personas (document_number, first_name, last_name, birth_date, sex,
                                  phone, email, address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PERSONA_COLUMNS}
            "#
        ))
        .bind(&p.document_number)
        .bind(&p.first_name)
        .bind(&p.last_name)
        .bind(p.birth_date)
        .bind(p.sex.as_str())
        .bind(&p.phone)
        .bind(&p.email)
        .bind(&p.address)
        .fetch_one(&mut *tx)
        .await
        .context("insert persona")?;

        let patient_id = match &new.patient {
            Some(profile) => Some(
                insert_profile_tx(
                    &mut tx,
                    "INSERT INTO patients (persona_id, insurance_code, blood_type, allergies) \
                     VALUES ($1, $2, $3, $4) RETURNING id",
                    persona.id,
                    &[
                        profile.insurance_code.as_deref(),
                        profile.blood_type.as_deref(),
                        profile.allergies.as_deref(),
                    ],
                )
                .await
                .context("insert patient profile")?,
            ),
            None => None,
        };

        let medical_staff_id = match &new.medical_staff {
            Some(profile) => Some(
                insert_profile_tx(
                    &mut tx,
                    "INSERT INTO medical_staff (persona_id, specialty, license_number) \
                     VALUES ($1, $2, $3) RETURNING id",
                    persona.id,
                    &[Some(profile.specialty.as_str()), Some(profile.license_number.as_str())],
                )
                .await
                .context("insert medical staff profile")?,
            ),
            None => None,
        };

        let administrative_id = match &new.administrative {
            Some(profile) => Some(
                insert_profile_tx(
                    &mut tx,
                    "INSERT INTO administrative_staff (persona_id, area) VALUES ($1, $2) RETURNING id",
                    persona.id,
                    &[Some(profile.area.as_str())],
                )
                .await
                .context("insert administrative profile")?,
            ),
            None => None,
        };

        tx.commit().await.context("commit tx")?;
        Ok(CreatedPerson {
            persona,
            patient_id,
            medical_staff_id,
            administrative_id,
        })
    }

    async fn delete_person(&self, persona_id: Uuid) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        for table in ["patients", "medical_staff", "administrative_staff"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE persona_id = $1"))
                .bind(persona_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("delete from {table}"))?;
        }
        let res = sqlx::query("DELETE FROM personas WHERE id = $1")
            .bind(persona_id)
            .execute(&mut *tx)
            .await
            .context("delete persona")?;
        tx.commit().await.context("commit tx")?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_person_by_document(&self, document_number: &str) -> anyhow::Result<Option<PersonaRow>> {
        let row = sqlx::query_as::<_, PersonaRow>(&format!(
            "SELECT {PERSONA_COLUMNS} FROM personas WHERE document_number = $1"
        ))
        .bind(document_number)
        .fetch_optional(&self.db)
        .await
        .context("find persona by document")?;
        Ok(row)
    }

    async fn profiles_for(&self, persona_id: Uuid) -> anyhow::Result<PersonaProfiles> {
        let profiles = sqlx::query_as::<_, PersonaProfiles>(
            r#"
            SELECT (SELECT id FROM patients WHERE persona_id = $1)             AS patient_id,
                   (SELECT id FROM medical_staff WHERE persona_id = $1)        AS medical_staff_id,
                   (SELECT id FROM administrative_staff WHERE persona_id = $1) AS administrative_id
            "#,
        )
        .bind(persona_id)
        .fetch_one(&self.db)
        .await
        .context("load persona profiles")?;
        Ok(profiles)
    }

    async fn patient_exists(&self, patient_id: Uuid) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM patients WHERE id = $1)")
            .bind(patient_id)
            .fetch_one(&self.db)
            .await
            .context("check patient")?;
        Ok(exists)
    }

    async fn medical_staff_exists(&self, staff_id: Uuid) -> anyhow::Result<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM medical_staff WHERE id = $1)")
                .bind(staff_id)
                .fetch_one(&self.db)
                .await
                .context("check medical staff")?;
        Ok(exists)
    }
}
