//! Convergence log parsing

use serde::{Deserialize, Serialize};

/// Token that marks a line as a convergence data point
pub const MARKER_TOKEN: &str = "k_eff";

/// Zero-based whitespace field holding the multiplication factor
pub const VALUE_FIELD: usize = 7;

/// One iteration's multiplication factor estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergencePoint {
    /// Ordinal of the point within the log (0-based)
    pub iteration: usize,

    /// Multiplication factor estimate `k`
    pub k: f64,
}

/// Ordered series of multiplication factor estimates, in log order
///
/// Built once by [`parse`]; read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    points: Vec<ConvergencePoint>,

    /// Lines carrying the marker whose value field was missing, not a number or
    /// not finite
    #[serde(default)]
    skipped_lines: Vec<usize>,
}

impl ConvergenceRecord {
    /// Build a record directly from `k` samples (mainly for tests and replays)
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Self {
        let points = samples
            .into_iter()
            .enumerate()
            .map(|(iteration, k)| ConvergencePoint { iteration, k })
            .collect();

        Self {
            points,
            skipped_lines: Vec::new(),
        }
    }

    pub fn points(&self) -> &[ConvergencePoint] {
        &self.points
    }

    /// Bare `k` values, in iteration order
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.k)
    }

    pub fn last(&self) -> Option<&ConvergencePoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 1-based line numbers of marker lines that could not be read
    pub fn skipped_lines(&self) -> &[usize] {
        &self.skipped_lines
    }
}

/// Parse a solver log into a [`ConvergenceRecord`]
///
/// A line is a data point iff one of its whitespace-separated tokens is exactly
/// [`MARKER_TOKEN`]. The value is read from field [`VALUE_FIELD`]. Lines without
/// the marker are ignored. A log with no marker lines yields an empty record;
/// reporting that is up to the caller.
pub fn parse(log_text: &str) -> ConvergenceRecord {
    let mut record = ConvergenceRecord::default();

    for (line_no, line) in log_text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if !tokens.contains(&MARKER_TOKEN) {
            continue;
        }

        match tokens
            .get(VALUE_FIELD)
            .and_then(|t| t.parse::<f64>().ok())
            .filter(|k| k.is_finite())
        {
            Some(k) => {
                let iteration = record.points.len();
                record.points.push(ConvergencePoint { iteration, k });
            }
            None => record.skipped_lines.push(line_no + 1),
        }
    }

    record
}
