//! In-process store used by the `memory` backend and by tests.
//!
//! Mirrors the constraints the Postgres schema enforces (unique email and
//! document number, foreign keys between clinical rows) so services see the
//! same failures on either backend. Individual operations can be told to
//! fail once through [`FailPoint`].

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use sqlx::types::Json;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    auth::{
        repo::IdentityStore,
        repo_types::{IdentityRow, NewIdentity, OneTimeToken},
    },
    clinical::{
        records::RecordKind,
        repo::ClinicalStore,
        repo_types::{
            AppointmentRow, AppointmentStatus, NewAppointment, NewRecord, RecordFilter, RecordRow,
            Scope, ServiceInstanceRow,
        },
    },
    faces::{repo::DescriptorStore, repo_types::DescriptorRecord, Descriptor},
    people::{
        repo::PeopleStore,
        repo_types::{CreatedPerson, NewPersonWithProfiles, PersonaProfiles, PersonaRow},
    },
};

/// Store operations that can be made to fail on their next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertIdentity,
    InsertOneTimeToken,
    ConsumeOneTimeToken,
    InsertSession,
    InsertDescriptor,
    CreatePerson,
    InsertServiceInstance,
    InsertRecord,
    DeleteRecords,
    DeleteServiceInstance,
}

struct StoredToken {
    token: OneTimeToken,
    consumed: bool,
}

struct StoredRecord {
    id: Uuid,
    service_instance_id: Uuid,
    kind: RecordKind,
    data: serde_json::Value,
    created_at: OffsetDateTime,
}

#[derive(Default)]
struct Tables {
    identities: BTreeMap<Uuid, IdentityRow>,
    tokens: HashMap<String, StoredToken>,
    // session id -> (user id, revoked)
    sessions: HashMap<Uuid, (Uuid, bool)>,
    descriptors: Vec<DescriptorRecord>,
    personas: HashMap<Uuid, PersonaRow>,
    // profile id -> persona id
    patients: HashMap<Uuid, Uuid>,
    medical_staff: HashMap<Uuid, Uuid>,
    administrative: HashMap<Uuid, Uuid>,
    appointments: Vec<AppointmentRow>,
    service_instances: HashMap<Uuid, ServiceInstanceRow>,
    records: Vec<StoredRecord>,
}

impl Tables {
    fn name_of(&self, profiles: &HashMap<Uuid, Uuid>, profile_id: Uuid) -> Option<String> {
        let persona_id = profiles.get(&profile_id)?;
        self.personas.get(persona_id).map(PersonaRow::full_name)
    }
}

#[derive(Default)]
pub struct MemoryDb {
    tables: RwLock<Tables>,
    fail: Mutex<HashSet<FailPoint>>,
}

impl MemoryDb {
    /// Makes the next call guarded by `point` return an error.
    pub async fn fail_on(&self, point: FailPoint) {
        self.fail.lock().await.insert(point);
    }

    #[cfg(test)]
    pub async fn service_instance_count(&self) -> usize {
        self.tables.read().await.service_instances.len()
    }

    async fn check(&self, point: FailPoint) -> anyhow::Result<()> {
        if self.fail.lock().await.remove(&point) {
            bail!("injected failure: {point:?}");
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryDb {
    async fn insert_identity(&self, new: &NewIdentity) -> anyhow::Result<IdentityRow> {
        self.check(FailPoint::InsertIdentity).await?;
        let mut t = self.tables.write().await;
        if let Some(email) = &new.email {
            if t.identities.values().any(|i| i.email.as_ref() == Some(email)) {
                bail!("duplicate key value violates unique constraint \"identities_email_key\"");
            }
        }
        let row = IdentityRow {
            id: Uuid::new_v4(),
            email: new.email.clone(),
            password_hash: new.password_hash.clone(),
            roles: new.roles.iter().map(|r| r.as_str().to_string()).collect(),
            persona_id: new.persona_id,
            display_name: new.display_name.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        t.identities.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_identity(&self, id: Uuid) -> anyhow::Result<Option<IdentityRow>> {
        Ok(self.tables.read().await.identities.get(&id).cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> anyhow::Result<Option<IdentityRow>> {
        let t = self.tables.read().await;
        Ok(t.identities
            .values()
            .find(|i| i.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert_one_time_token(&self, token: &OneTimeToken) -> anyhow::Result<()> {
        self.check(FailPoint::InsertOneTimeToken).await?;
        let mut t = self.tables.write().await;
        if !t.identities.contains_key(&token.user_id) {
            bail!("one_time_tokens.user_id references a missing identity");
        }
        t.tokens.insert(
            token.token.clone(),
            StoredToken {
                token: token.clone(),
                consumed: false,
            },
        );
        Ok(())
    }

    async fn consume_one_time_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<Uuid>> {
        self.check(FailPoint::ConsumeOneTimeToken).await?;
        let mut t = self.tables.write().await;
        match t.tokens.get_mut(token) {
            Some(stored) if !stored.consumed && stored.token.expires_at > now => {
                stored.consumed = true;
                Ok(Some(stored.token.user_id))
            }
            _ => Ok(None),
        }
    }

    async fn insert_session(&self, user_id: Uuid) -> anyhow::Result<Uuid> {
        self.check(FailPoint::InsertSession).await?;
        let id = Uuid::new_v4();
        self.tables.write().await.sessions.insert(id, (user_id, false));
        Ok(id)
    }

    async fn session_is_active(&self, session_id: Uuid) -> anyhow::Result<bool> {
        let t = self.tables.read().await;
        Ok(matches!(t.sessions.get(&session_id), Some((_, false))))
    }

    async fn revoke_session(&self, session_id: Uuid) -> anyhow::Result<bool> {
        let mut t = self.tables.write().await;
        match t.sessions.get_mut(&session_id) {
            Some((_, revoked)) if !*revoked => {
                *revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl DescriptorStore for MemoryDb {
    async fn insert_descriptor(
        &self,
        user_id: Uuid,
        descriptor: &Descriptor,
    ) -> anyhow::Result<DescriptorRecord> {
        self.check(FailPoint::InsertDescriptor).await?;
        let mut t = self.tables.write().await;
        if !t.identities.contains_key(&user_id) {
            bail!("face_descriptors.user_id references a missing identity");
        }
        let record = DescriptorRecord {
            id: Uuid::new_v4(),
            user_id,
            descriptor: descriptor.as_slice().to_vec(),
            created_at: OffsetDateTime::now_utc(),
        };
        t.descriptors.push(record.clone());
        Ok(record)
    }

    async fn list_all_descriptors(&self) -> anyhow::Result<Vec<DescriptorRecord>> {
        Ok(self.tables.read().await.descriptors.clone())
    }

    async fn list_descriptors_for(&self, user_id: Uuid) -> anyhow::Result<Vec<DescriptorRecord>> {
        let t = self.tables.read().await;
        Ok(t.descriptors
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_descriptors_for(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let mut t = self.tables.write().await;
        let before = t.descriptors.len();
        t.descriptors.retain(|d| d.user_id != user_id);
        Ok((before - t.descriptors.len()) as u64)
    }
}

#[async_trait]
impl PeopleStore for MemoryDb {
    async fn create_person(&self, new: &NewPersonWithProfiles) -> anyhow::Result<CreatedPerson> {
        self.check(FailPoint::CreatePerson).await?;
        let mut t = self.tables.write().await;
        let p = &new.persona;
        if t
            .personas
            .values()
            .any(|row| row.document_number == p.document_number)
        {
            bail!("duplicate key value violates unique constraint \"personas_document_number_key\"");
        }

        let persona = PersonaRow {
            id: Uuid::new_v4(),
            document_number: p.document_number.clone(),
            first_name: p.first_name.clone(),
            last_name: p.last_name.clone(),
            birth_date: p.birth_date,
            sex: p.sex.as_str().to_string(),
            phone: p.phone.clone(),
            email: p.email.clone(),
            address: p.address.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        t.personas.insert(persona.id, persona.clone());

        let add = |present: bool, profiles: &mut HashMap<Uuid, Uuid>| {
            present.then(|| {
                let id = Uuid::new_v4();
                profiles.insert(id, persona.id);
                id
            })
        };
        let patient_id = add(new.patient.is_some(), &mut t.patients);
        let medical_staff_id = add(new.medical_staff.is_some(), &mut t.medical_staff);
        let administrative_id = add(new.administrative.is_some(), &mut t.administrative);

        Ok(CreatedPerson {
            persona,
            patient_id,
            medical_staff_id,
            administrative_id,
        })
    }

    async fn delete_person(&self, persona_id: Uuid) -> anyhow::Result<bool> {
        let mut t = self.tables.write().await;
        t.patients.retain(|_, p| *p != persona_id);
        t.medical_staff.retain(|_, p| *p != persona_id);
        t.administrative.retain(|_, p| *p != persona_id);
        Ok(t.personas.remove(&persona_id).is_some())
    }

    async fn find_person_by_document(&self, document_number: &str) -> anyhow::Result<Option<PersonaRow>> {
        let t = self.tables.read().await;
        Ok(t.personas
            .values()
            .find(|p| p.document_number == document_number)
            .cloned())
    }

    async fn profiles_for(&self, persona_id: Uuid) -> anyhow::Result<PersonaProfiles> {
        let t = self.tables.read().await;
        let find = |profiles: &HashMap<Uuid, Uuid>| {
            profiles
                .iter()
                .find(|(_, p)| **p == persona_id)
                .map(|(id, _)| *id)
        };
        Ok(PersonaProfiles {
            patient_id: find(&t.patients),
            medical_staff_id: find(&t.medical_staff),
            administrative_id: find(&t.administrative),
        })
    }

    async fn patient_exists(&self, patient_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.tables.read().await.patients.contains_key(&patient_id))
    }

    async fn medical_staff_exists(&self, staff_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.tables.read().await.medical_staff.contains_key(&staff_id))
    }
}

#[async_trait]
impl ClinicalStore for MemoryDb {
    async fn insert_appointment(&self, new: &NewAppointment) -> anyhow::Result<AppointmentRow> {
        let mut t = self.tables.write().await;
        if !t.patients.contains_key(&new.patient_id) {
            bail!("appointments.patient_id references a missing patient");
        }
        if !t.medical_staff.contains_key(&new.staff_id) {
            bail!("appointments.staff_id references missing medical staff");
        }
        let row = AppointmentRow {
            id: Uuid::new_v4(),
            patient_id: new.patient_id,
            staff_id: new.staff_id,
            scheduled_at: new.scheduled_at,
            reason: new.reason.clone(),
            status: AppointmentStatus::Scheduled.as_str().to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        t.appointments.push(row.clone());
        Ok(row)
    }

    async fn find_appointment(&self, id: Uuid) -> anyhow::Result<Option<AppointmentRow>> {
        let t = self.tables.read().await;
        Ok(t.appointments.iter().find(|a| a.id == id).cloned())
    }

    async fn list_appointments(&self, scope: Scope) -> anyhow::Result<Vec<AppointmentRow>> {
        let t = self.tables.read().await;
        let mut rows: Vec<AppointmentRow> = t
            .appointments
            .iter()
            .filter(|a| scope.covers(a.patient_id, a.staff_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(rows)
    }

    async fn insert_service_instance(
        &self,
        appointment_id: Uuid,
        kind: RecordKind,
    ) -> anyhow::Result<ServiceInstanceRow> {
        self.check(FailPoint::InsertServiceInstance).await?;
        let mut t = self.tables.write().await;
        if !t.appointments.iter().any(|a| a.id == appointment_id) {
            bail!("service_instances.appointment_id references a missing appointment");
        }
        let row = ServiceInstanceRow {
            id: Uuid::new_v4(),
            appointment_id,
            kind: kind.as_str().to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        t.service_instances.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_service_instance(&self, id: Uuid) -> anyhow::Result<Option<ServiceInstanceRow>> {
        Ok(self.tables.read().await.service_instances.get(&id).cloned())
    }

    async fn delete_service_instance(&self, id: Uuid) -> anyhow::Result<bool> {
        self.check(FailPoint::DeleteServiceInstance).await?;
        let mut t = self.tables.write().await;
        if t.records.iter().any(|r| r.service_instance_id == id) {
            bail!("service instance {id} is still referenced by a clinical record");
        }
        Ok(t.service_instances.remove(&id).is_some())
    }

    async fn insert_record(&self, new: &NewRecord) -> anyhow::Result<Uuid> {
        self.check(FailPoint::InsertRecord).await?;
        let data = new.record.data_json()?;
        let mut t = self.tables.write().await;
        if !t.service_instances.contains_key(&new.service_instance_id) {
            bail!("record references a missing service instance");
        }
        let id = Uuid::new_v4();
        t.records.push(StoredRecord {
            id,
            service_instance_id: new.service_instance_id,
            kind: new.record.kind(),
            data,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    async fn delete_records(&self, service_instance_id: Uuid, kind: RecordKind) -> anyhow::Result<u64> {
        self.check(FailPoint::DeleteRecords).await?;
        let mut t = self.tables.write().await;
        let before = t.records.len();
        t.records
            .retain(|r| !(r.service_instance_id == service_instance_id && r.kind == kind));
        Ok((before - t.records.len()) as u64)
    }

    async fn list_records(&self, scope: Scope, filter: RecordFilter) -> anyhow::Result<Vec<RecordRow>> {
        let t = self.tables.read().await;
        let mut rows = Vec::new();
        // newest first; reverse insertion order breaks timestamp ties
        for r in t.records.iter().rev() {
            if filter.kind.is_some_and(|k| k != r.kind)
                || filter
                    .service_instance_id
                    .is_some_and(|id| id != r.service_instance_id)
            {
                continue;
            }
            let si = t
                .service_instances
                .get(&r.service_instance_id)
                .ok_or_else(|| anyhow!("record {} has no service instance", r.id))?;
            let Some(appt) = t.appointments.iter().find(|a| a.id == si.appointment_id) else {
                continue;
            };
            let visible = match scope {
                Scope::MedicalStaff(staff_id) => t
                    .appointments
                    .iter()
                    .any(|a| a.staff_id == staff_id && a.patient_id == appt.patient_id),
                other => other.covers(appt.patient_id, appt.staff_id),
            };
            if !visible {
                continue;
            }
            let (Some(patient_name), Some(staff_name)) = (
                t.name_of(&t.patients, appt.patient_id),
                t.name_of(&t.medical_staff, appt.staff_id),
            ) else {
                continue;
            };
            rows.push(RecordRow {
                record_id: r.id,
                service_instance_id: r.service_instance_id,
                kind: r.kind.as_str().to_string(),
                data: Json(r.data.clone()),
                created_at: r.created_at,
                appointment_id: appt.id,
                scheduled_at: appt.scheduled_at,
                patient_id: appt.patient_id,
                patient_name,
                staff_id: appt.staff_id,
                staff_name,
            });
        }
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            email: Some(email.into()),
            password_hash: None,
            roles: vec![Role::Patient],
            persona_id: None,
            display_name: None,
        }
    }

    #[tokio::test]
    async fn fail_point_fires_once() {
        let db = MemoryDb::default();
        db.fail_on(FailPoint::InsertIdentity).await;
        assert!(db.insert_identity(&new_identity("a@b.pe")).await.is_err());
        assert!(db.insert_identity(&new_identity("a@b.pe")).await.is_ok());
    }

    #[tokio::test]
    async fn email_is_unique() {
        let db = MemoryDb::default();
        db.insert_identity(&new_identity("a@b.pe")).await.unwrap();
        assert!(db.insert_identity(&new_identity("a@b.pe")).await.is_err());
    }

    #[tokio::test]
    async fn one_time_token_is_single_use_and_expires() {
        let db = MemoryDb::default();
        let user = db.insert_identity(&new_identity("a@b.pe")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        for (token, ttl) in [("fresh", 60), ("stale", -1)] {
            db.insert_one_time_token(&OneTimeToken {
                token: token.into(),
                user_id: user.id,
                expires_at: now + time::Duration::seconds(ttl),
            })
            .await
            .unwrap();
        }

        assert_eq!(db.consume_one_time_token("fresh", now).await.unwrap(), Some(user.id));
        assert_eq!(db.consume_one_time_token("fresh", now).await.unwrap(), None);
        assert_eq!(db.consume_one_time_token("stale", now).await.unwrap(), None);
        assert_eq!(db.consume_one_time_token("missing", now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn revoked_session_is_inactive() {
        let db = MemoryDb::default();
        let sid = db.insert_session(Uuid::new_v4()).await.unwrap();
        assert!(db.session_is_active(sid).await.unwrap());
        assert!(db.revoke_session(sid).await.unwrap());
        assert!(!db.session_is_active(sid).await.unwrap());
        assert!(!db.revoke_session(sid).await.unwrap());
    }
}
