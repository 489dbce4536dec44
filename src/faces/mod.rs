pub mod descriptor;
pub mod dto;
pub mod handlers;
pub mod matcher;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use descriptor::Descriptor;

pub fn router() -> Router<AppState> {
    handlers::face_routes()
}
