//! Clinical record kinds and their typed payloads.
//!
//! Every kind lives in its own table, one row per service instance, with the
//! payload stored as JSON. The enum tag doubles as the table selector.

use std::{fmt, str::FromStr};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Triage,
    Exam,
    Diagnosis,
    Order,
    Therapy,
    Surgery,
    Treatment,
    Medication,
}

impl RecordKind {
    pub const ALL: [RecordKind; 8] = [
        RecordKind::Triage,
        RecordKind::Exam,
        RecordKind::Diagnosis,
        RecordKind::Order,
        RecordKind::Therapy,
        RecordKind::Surgery,
        RecordKind::Treatment,
        RecordKind::Medication,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Triage => "triage",
            RecordKind::Exam => "exam",
            RecordKind::Diagnosis => "diagnosis",
            RecordKind::Order => "order",
            RecordKind::Therapy => "therapy",
            RecordKind::Surgery => "surgery",
            RecordKind::Treatment => "treatment",
            RecordKind::Medication => "medication",
        }
    }

    /// Table holding the specialised rows of this kind.
    pub fn table(self) -> &'static str {
        match self {
            RecordKind::Triage => "triages",
            RecordKind::Exam => "exams",
            RecordKind::Diagnosis => "diagnoses",
            RecordKind::Order => "medical_orders",
            RecordKind::Therapy => "therapies",
            RecordKind::Surgery => "surgeries",
            RecordKind::Treatment => "treatments",
            RecordKind::Medication => "medications",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .with_context(|| format!("unknown record kind {s:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Triage {
    pub weight_kg: Option<f32>,
    pub height_cm: Option<f32>,
    pub temperature_c: Option<f32>,
    /// e.g. "120/80"
    pub blood_pressure: Option<String>,
    pub heart_rate: Option<u16>,
    pub respiratory_rate: Option<u16>,
    pub oxygen_saturation: Option<u8>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub exam_type: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisType {
    Presumptive,
    Definitive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// ICD-10 code.
    pub code: String,
    pub description: String,
    pub diagnosis_type: DiagnosisType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalOrder {
    pub order_type: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Therapy {
    pub therapy_type: String,
    #[serde(default)]
    pub sessions: Option<u16>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surgery {
    pub procedure: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub scheduled_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub operating_room: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub description: String,
    #[serde(default)]
    pub duration_days: Option<u16>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub duration_days: Option<u16>,
}

/// A specialised clinical row, tagged by kind: `{"kind": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ClinicalRecord {
    Triage(Triage),
    Exam(Exam),
    Diagnosis(Diagnosis),
    Order(MedicalOrder),
    Therapy(Therapy),
    Surgery(Surgery),
    Treatment(Treatment),
    Medication(Medication),
}

fn require(problems: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        problems.push(format!("{field} is required"));
    }
}

fn in_range<T: PartialOrd + Copy + fmt::Display>(
    problems: &mut Vec<String>,
    field: &str,
    value: Option<T>,
    lo: T,
    hi: T,
) {
    if let Some(v) = value {
        if v < lo || v > hi {
            problems.push(format!("{field} must be between {lo} and {hi}"));
        }
    }
}

impl ClinicalRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            ClinicalRecord::Triage(_) => RecordKind::Triage,
            ClinicalRecord::Exam(_) => RecordKind::Exam,
            ClinicalRecord::Diagnosis(_) => RecordKind::Diagnosis,
            ClinicalRecord::Order(_) => RecordKind::Order,
            ClinicalRecord::Therapy(_) => RecordKind::Therapy,
            ClinicalRecord::Surgery(_) => RecordKind::Surgery,
            ClinicalRecord::Treatment(_) => RecordKind::Treatment,
            ClinicalRecord::Medication(_) => RecordKind::Medication,
        }
    }

    /// Payload as stored in the kind's table.
    pub fn data_json(&self) -> anyhow::Result<serde_json::Value> {
        let mut tagged = serde_json::to_value(self).context("serialize clinical record")?;
        tagged
            .get_mut("data")
            .map(serde_json::Value::take)
            .context("clinical record without data")
    }

    /// Rebuilds a record from its kind and stored payload.
    pub fn from_parts(kind: RecordKind, data: serde_json::Value) -> anyhow::Result<Self> {
        serde_json::from_value(serde_json::json!({ "kind": kind, "data": data }))
            .with_context(|| format!("decode {kind} payload"))
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut p = Vec::new();
        match self {
            ClinicalRecord::Triage(t) => {
                in_range(&mut p, "weight_kg", t.weight_kg, 0.5, 400.0);
                in_range(&mut p, "height_cm", t.height_cm, 20.0, 260.0);
                in_range(&mut p, "temperature_c", t.temperature_c, 30.0, 45.0);
                in_range(&mut p, "heart_rate", t.heart_rate, 20, 250);
                in_range(&mut p, "respiratory_rate", t.respiratory_rate, 4, 80);
                in_range(&mut p, "oxygen_saturation", t.oxygen_saturation, 50, 100);
                if let Some(bp) = &t.blood_pressure {
                    let ok = bp
                        .split_once('/')
                        .map(|(s, d)| s.trim().parse::<u16>().is_ok() && d.trim().parse::<u16>().is_ok())
                        .unwrap_or(false);
                    if !ok {
                        p.push("blood_pressure must look like 120/80".to_string());
                    }
                }
            }
            ClinicalRecord::Exam(e) => require(&mut p, "exam_type", &e.exam_type),
            ClinicalRecord::Diagnosis(d) => {
                require(&mut p, "code", &d.code);
                require(&mut p, "description", &d.description);
            }
            ClinicalRecord::Order(o) => {
                require(&mut p, "order_type", &o.order_type);
                require(&mut p, "description", &o.description);
            }
            ClinicalRecord::Therapy(t) => require(&mut p, "therapy_type", &t.therapy_type),
            ClinicalRecord::Surgery(s) => require(&mut p, "procedure", &s.procedure),
            ClinicalRecord::Treatment(t) => require(&mut p, "description", &t.description),
            ClinicalRecord::Medication(m) => {
                require(&mut p, "name", &m.name);
                require(&mut p, "dosage", &m.dosage);
                require(&mut p, "frequency", &m.frequency);
            }
        }
        if p.is_empty() {
            Ok(())
        } else {
            Err(p)
        }
    }
}
