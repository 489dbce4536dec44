use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Roles an identity can hold. Stored as text in identity metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    MedicalStaff,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Patient, Role::MedicalStaff, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::MedicalStaff => "medical_staff",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role {0:?}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" | "paciente" => Ok(Role::Patient),
            "medical_staff" | "personal_medico" => Ok(Role::MedicalStaff),
            "admin" | "administrativo" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_legacy_names() {
        assert_eq!("patient".parse::<Role>().unwrap(), Role::Patient);
        assert_eq!("Personal_Medico".parse::<Role>().unwrap(), Role::MedicalStaff);
        assert_eq!(" administrativo ".parse::<Role>().unwrap(), Role::Admin);
        assert!("nurse".parse::<Role>().is_err());
    }

    #[test]
    fn display_matches_serde_name() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role));
        }
    }
}
