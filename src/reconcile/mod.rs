// src/reconcile/mod.rs
//! Matched/unmatched partitioning of geocoded results.

pub mod mapping;

use crate::error::{LicsyncError, Result};
use crate::geocode::{GeocodedTable, STATUS_FIELD};
use crate::table::write_rows;
use std::{iter, path::Path};
use tracing::{info, instrument};

pub use mapping::{FieldMapping, FieldType, FieldValue, MappingTable, TargetRow};

/// Match status codes assigned by the geocoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchStatus {
    Matched,
    Tied,
    Unmatched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MatchStatus::Matched => "M",
            MatchStatus::Tied => "T",
            MatchStatus::Unmatched => "U",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim() {
            "M" => Some(MatchStatus::Matched),
            "T" => Some(MatchStatus::Tied),
            "U" => Some(MatchStatus::Unmatched),
            _ => None,
        }
    }
}

/// Result of `split`: both halves keep the input's header and row order.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub matched: GeocodedTable,
    pub unmatched: GeocodedTable,
    pub tied: usize,
}

/// Partition rows into matched (`M`, `T`) and unmatched (`U`).
/// Any other code fails the whole split, listing each offending 1-based row.
#[instrument(level = "info", skip(results), fields(rows = results.rows.len()))]
pub fn split(results: &GeocodedTable) -> Result<Partition> {
    let mut matched = GeocodedTable::new(results.headers.clone());
    let mut unmatched = GeocodedTable::new(results.headers.clone());
    let mut undefined = Vec::new();
    let mut tied = 0;

    for (idx, row) in results.rows.iter().enumerate() {
        match MatchStatus::from_code(&row.status) {
            Some(MatchStatus::Matched) => matched.rows.push(row.clone()),
            Some(MatchStatus::Tied) => {
                tied += 1;
                matched.rows.push(row.clone());
            }
            Some(MatchStatus::Unmatched) => unmatched.rows.push(row.clone()),
            None => undefined.push((idx + 1, row.status.clone())),
        }
    }

    if !undefined.is_empty() {
        return Err(LicsyncError::UndefinedStatus { rows: undefined });
    }

    info!(
        matched = matched.rows.len(),
        tied,
        unmatched = unmatched.rows.len(),
        "split geocoded results"
    );
    Ok(Partition {
        matched,
        unmatched,
        tied,
    })
}

/// Export unmatched rows verbatim, status column first, for manual correction.
pub fn write_unmatched_report(unmatched: &GeocodedTable, path: &Path) -> Result<()> {
    let headers: Vec<String> = iter::once(STATUS_FIELD.to_string())
        .chain(unmatched.headers.iter().cloned())
        .collect();
    let rows = unmatched.rows.iter().map(|row| {
        iter::once(row.status.as_str()).chain(row.values.iter().map(String::as_str))
    });
    write_rows(path, &headers, rows)?;
    info!(rows = unmatched.rows.len(), path = %path.display(), "wrote unmatched report");
    Ok(())
}
