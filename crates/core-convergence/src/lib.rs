//! Pulsar Core Convergence: k_eff log parsing and criticality verdicts
//!
//! The transport solver writes one line per power iteration. Lines carrying the
//! `k_eff` token hold the current multiplication factor estimate in a fixed
//! whitespace-separated field. This crate turns such a log into a
//! [`ConvergenceRecord`] and reduces the record to a [`Classification`].
//!
//! # Example
//!
//! ```rust
//! use pulsar_core_convergence::{classify, parse, Classification, DEFAULT_TOLERANCE};
//!
//! let log = "[ NORMAL ] Iteration 0: k_eff = 0.912345 res = 1.0E-1\n\
//!            [ NORMAL ] Iteration 1: k_eff = 0.999991 res = 1.0E-4\n";
//!
//! let record = parse(log);
//! assert_eq!(record.len(), 2);
//! assert_eq!(classify(&record, DEFAULT_TOLERANCE).unwrap(), Classification::Critical);
//! ```
//!
//! Classification depends only on the final point. Earlier points are kept so a
//! plotting front-end can render the whole convergence curve.

mod classify;
mod parse;

pub use classify::{classify, Classification, EmptyRecordError, DEFAULT_TOLERANCE};
pub use parse::{parse, ConvergencePoint, ConvergenceRecord, MARKER_TOKEN, VALUE_FIELD};
