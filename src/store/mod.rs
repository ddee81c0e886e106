// src/store/mod.rs

pub mod parquet_layer;

use crate::reconcile::TargetRow;
use anyhow::Result;

pub use parquet_layer::ParquetLayer;

/// The authoritative layer. `replace` must be all-or-nothing: readers see
/// either the previous snapshot or the complete new one.
pub trait TargetStore {
    /// Replace the layer's contents with `rows`; returns the rows written.
    fn replace(&self, rows: &[TargetRow]) -> Result<usize>;

    fn row_count(&self) -> Result<usize>;
}
