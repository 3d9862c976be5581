//! Criticality classification

use crate::parse::ConvergenceRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Distance from `k = 1.0` still treated as critical
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// Verdict for a converged reactor model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// `|k - 1| < tolerance`
    Critical,
    /// `k < 1`: the chain reaction dies out
    SubCritical,
    /// `k > 1`: the chain reaction grows
    SuperCritical,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Critical => write!(f, "Critical"),
            Classification::SubCritical => write!(f, "Sub-critical"),
            Classification::SuperCritical => write!(f, "Super-critical"),
        }
    }
}

/// Returned by [`classify`] when the record holds no points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("convergence record is empty, nothing to classify")]
pub struct EmptyRecordError;

/// Classify the final point of `record`
///
/// Only the last point matters. `tolerance` is compared strictly, so a value
/// exactly `tolerance` away from 1.0 is not critical.
pub fn classify(
    record: &ConvergenceRecord,
    tolerance: f64,
) -> Result<Classification, EmptyRecordError> {
    let k = record.last().ok_or(EmptyRecordError)?.k;

    let verdict = if (k - 1.0).abs() < tolerance {
        Classification::Critical
    } else if k < 1.0 {
        Classification::SubCritical
    } else {
        Classification::SuperCritical
    };

    Ok(verdict)
}
