/*!
 * Convergence series export
 *
 * Writes a parsed convergence record and its verdict as JSON, for plotting
 * k_eff against iteration outside of Pulsar.
 */

use pulsar_core_convergence::{Classification, ConvergencePoint, ConvergenceRecord};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;

/// JSON document describing one convergence series
#[derive(Debug, Serialize)]
pub struct SeriesExport<'a> {
    /// Log the series was parsed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'a Path>,

    pub classification: Classification,
    pub final_k: f64,
    pub tolerance: f64,
    pub points: &'a [ConvergencePoint],

    /// 1-based line numbers of unreadable marker lines
    pub skipped_lines: &'a [usize],
}

impl<'a> SeriesExport<'a> {
    /// `None` for an empty record
    pub fn new(
        record: &'a ConvergenceRecord,
        classification: Classification,
        tolerance: f64,
    ) -> Option<Self> {
        let last = record.last()?;
        Some(Self {
            source: None,
            classification,
            final_k: last.k,
            tolerance,
            points: record.points(),
            skipped_lines: record.skipped_lines(),
        })
    }

    pub fn with_source(mut self, source: &'a Path) -> Self {
        self.source = Some(source);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write pretty-printed JSON to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
