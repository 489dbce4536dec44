pub mod dto;
pub mod handlers;
pub mod records;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use records::{ClinicalRecord, RecordKind};

pub fn router() -> Router<AppState> {
    handlers::clinical_routes()
}
