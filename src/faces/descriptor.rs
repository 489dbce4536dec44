use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Face descriptor: a fixed-length embedding produced by the external extractor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    /// Validates dimensionality and rejects NaN / infinite components.
    pub fn new(values: Vec<f32>, expected_len: usize) -> AppResult<Self> {
        if values.len() != expected_len {
            return Err(AppError::BadRequest(format!(
                "descriptor must have {expected_len} values, got {}",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AppError::BadRequest(
                "descriptor values must be finite numbers".into(),
            ));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance, or `None` when the lengths differ.
    pub fn distance_to(&self, other: &[f32]) -> Option<f32> {
        euclidean(&self.0, other)
    }
}

pub fn euclidean(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    Some(sum.sqrt())
}
