use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the filter, reconcile and publish stages.
#[derive(Error, Debug)]
pub enum LicsyncError {
    #[error("missing column `{column}` in {context}")]
    MissingColumn { column: String, context: String },

    #[error("undefined match status in {} row(s): {}", rows.len(), format_status_rows(rows))]
    UndefinedStatus { rows: Vec<(usize, String)> },

    #[error("row {row}: cannot map field `{field}` value {value:?} to {target_type}")]
    Mapping {
        row: usize,
        field: String,
        value: String,
        target_type: String,
    },

    #[error("invalid field mapping: {0}")]
    InvalidMapping(String),

    #[error("fetching {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("archive {path:?} must hold exactly one CSV entry, found {found}")]
    ArchiveLayout { path: PathBuf, found: usize },

    #[error("locator: {0}")]
    Locator(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_status_rows(rows: &[(usize, String)]) -> String {
    rows.iter()
        .map(|(idx, code)| format!("row {} = {:?}", idx, code))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, LicsyncError>;
