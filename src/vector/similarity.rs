//! Vector validation and cosine similarity.

use crate::error::{PilumError, Result};

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place. Returns the original norm.
pub fn normalize(v: &mut [f32]) -> f32 {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

/// Reject vectors that cannot take part in a cosine search: wrong
/// dimension, non-finite components, or zero length.
pub fn validate(v: &[f32], expected_dimension: usize) -> Result<()> {
    if v.len() != expected_dimension {
        return Err(PilumError::invalid_vector(format!(
            "dimension mismatch: expected {expected_dimension}, got {}",
            v.len()
        )));
    }
    if let Some(position) = v.iter().position(|x| !x.is_finite()) {
        return Err(PilumError::invalid_vector(format!(
            "non-finite component at position {position}"
        )));
    }
    if l2_norm(v) == 0.0 {
        return Err(PilumError::invalid_vector("zero-length vector"));
    }
    Ok(())
}

/// Cosine similarity in `[-1, 1]`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(PilumError::invalid_vector(format!(
            "cannot compare vectors of dimension {} and {}",
            a.len(),
            b.len()
        )));
    }
    let norms = l2_norm(a) * l2_norm(b);
    if norms == 0.0 {
        return Ok(0.0);
    }
    Ok((dot(a, b) / norms).clamp(-1.0, 1.0))
}
