use super::TargetStore;
use crate::reconcile::{FieldType, FieldValue, MappingTable, TargetRow};
use anyhow::{bail, Context, Result};
use arrow::{
    array::{
        ArrayRef, Date32Builder, Float64Builder, Int16Builder, Int32Builder, StringBuilder,
    },
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use chrono::NaiveDate;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::{
        properties::WriterProperties,
        reader::{FileReader, SerializedFileReader},
    },
};
use std::{
    fs::{self, File},
    io::{BufWriter, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, instrument, warn};

/// Geometry column appended after the mapped attributes.
pub const SHAPE_FIELD: &str = "Shape";

/// A layer stored as a single Parquet file, replaced by writing
/// `<layer>.parquet.tmp` in full and renaming it over the live file.
pub struct ParquetLayer {
    path: PathBuf,
    mapping: MappingTable,
}

fn arrow_type(ty: FieldType) -> DataType {
    match ty {
        FieldType::Short => DataType::Int16,
        FieldType::Long => DataType::Int32,
        FieldType::Double => DataType::Float64,
        FieldType::Date => DataType::Date32,
        FieldType::Text => DataType::Utf8,
    }
}

fn days_since_epoch(d: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (d - epoch).num_days() as i32
}

impl ParquetLayer {
    pub fn new(path: impl Into<PathBuf>, mapping: MappingTable) -> Self {
        Self {
            path: path.into(),
            mapping,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> Arc<Schema> {
        let mut fields: Vec<Field> = self
            .mapping
            .entries()
            .iter()
            .map(|m| Field::new(&m.target, arrow_type(m.ty), true))
            .collect();
        fields.push(Field::new(SHAPE_FIELD, DataType::Utf8, true));
        Arc::new(Schema::new(fields))
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Remove a staging file left behind by an interrupted run.
    fn clear_stale_staging(&self) {
        let path = self.staging_path();
        match fs::remove_file(&path) {
            Ok(()) => warn!(path = %path.display(), "removed stale staging file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot remove stale staging file"),
        }
    }

    fn build_batch(&self, rows: &[TargetRow]) -> Result<RecordBatch> {
        let entries = self.mapping.entries();
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.values.len() != entries.len())
        {
            bail!(
                "row {} has {} values, layer expects {}",
                idx + 1,
                row.values.len(),
                entries.len()
            );
        }

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(entries.len() + 1);
        for (col, m) in entries.iter().enumerate() {
            let mismatch = |row: usize, v: &FieldValue| {
                anyhow::anyhow!(
                    "row {}: value {:?} does not fit {} field `{}`",
                    row + 1,
                    v,
                    m.ty,
                    m.target
                )
            };
            let array: ArrayRef = match m.ty {
                FieldType::Short => {
                    let mut b = Int16Builder::with_capacity(rows.len());
                    for (i, r) in rows.iter().enumerate() {
                        match &r.values[col] {
                            FieldValue::Short(v) => b.append_value(*v),
                            FieldValue::Null => b.append_null(),
                            other => return Err(mismatch(i, other)),
                        }
                    }
                    Arc::new(b.finish())
                }
                FieldType::Long => {
                    let mut b = Int32Builder::with_capacity(rows.len());
                    for (i, r) in rows.iter().enumerate() {
                        match &r.values[col] {
                            FieldValue::Long(v) => b.append_value(*v),
                            FieldValue::Null => b.append_null(),
                            other => return Err(mismatch(i, other)),
                        }
                    }
                    Arc::new(b.finish())
                }
                FieldType::Double => {
                    let mut b = Float64Builder::with_capacity(rows.len());
                    for (i, r) in rows.iter().enumerate() {
                        match &r.values[col] {
                            FieldValue::Double(v) => b.append_value(*v),
                            FieldValue::Null => b.append_null(),
                            other => return Err(mismatch(i, other)),
                        }
                    }
                    Arc::new(b.finish())
                }
                FieldType::Date => {
                    let mut b = Date32Builder::with_capacity(rows.len());
                    for (i, r) in rows.iter().enumerate() {
                        match &r.values[col] {
                            FieldValue::Date(d) => b.append_value(days_since_epoch(*d)),
                            FieldValue::Null => b.append_null(),
                            other => return Err(mismatch(i, other)),
                        }
                    }
                    Arc::new(b.finish())
                }
                FieldType::Text => {
                    let mut b = StringBuilder::new();
                    for (i, r) in rows.iter().enumerate() {
                        match &r.values[col] {
                            FieldValue::Text(s) => b.append_value(s),
                            FieldValue::Null => b.append_null(),
                            other => return Err(mismatch(i, other)),
                        }
                    }
                    Arc::new(b.finish())
                }
            };
            columns.push(array);
        }

        let mut shape = StringBuilder::new();
        for r in rows {
            shape.append_option(r.shape.map(|p| p.to_wkt()));
        }
        columns.push(Arc::new(shape.finish()));

        RecordBatch::try_new(self.schema(), columns).context("building layer record batch")
    }

    fn write_staged(&self, tmp_path: &Path, batch: &RecordBatch) -> Result<()> {
        let tmp_file = File::create(tmp_path)
            .with_context(|| format!("could not create staging file `{}`", tmp_path.display()))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(BufWriter::new(tmp_file), batch.schema(), Some(props))
            .context("creating ArrowWriter for layer")?;
        writer.write(batch).context("writing layer batch")?;
        writer.close().context("closing ArrowWriter for layer")?;
        Ok(())
    }

    /// Read the whole layer back.
    pub fn read_batches(&self) -> Result<Vec<RecordBatch>> {
        Self::read_file(&self.path)
    }

    /// Read any layer file using the schema stored in the file.
    pub fn read_file(path: &Path) -> Result<Vec<RecordBatch>> {
        let file =
            File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("failed to read `{}`", path.display()))?
            .build()?;
        reader
            .map(|b| b.context("reading layer batch"))
            .collect()
    }
}

impl TargetStore for ParquetLayer {
    #[instrument(level = "info", skip(self, rows), fields(layer = %self.path.display(), rows = rows.len()))]
    fn replace(&self, rows: &[TargetRow]) -> Result<usize> {
        self.clear_stale_staging();
        let batch = self.build_batch(rows)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating layer directory {:?}", parent))?;
        }
        let tmp_path = self.staging_path();
        if let Err(e) = self.write_staged(&tmp_path, &batch) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        // Rename the staged file over the live layer
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to rename `{}` to `{}`",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        info!("replaced layer contents");
        Ok(rows.len())
    }

    fn row_count(&self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open `{}`", self.path.display()))?;
        let reader = SerializedFileReader::new(file)?;
        Ok(reader.metadata().file_metadata().num_rows() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::Point;
    use crate::reconcile::FieldMapping;
    use arrow::array::{Array, Date32Array, Int32Array, StringArray};
    use tempfile::tempdir;

    fn mapping() -> MappingTable {
        MappingTable::new(vec![
            FieldMapping::new("File_Number", "FileNumber", FieldType::Long),
            FieldMapping::new("Orig_Iss_Date", "IssueDate", FieldType::Date),
            FieldMapping::new("Primary_Name", "OwnerName", FieldType::Text),
        ])
        .expect("valid mapping")
    }

    fn row(file_number: i32, owner: &str) -> TargetRow {
        TargetRow {
            values: vec![
                FieldValue::Long(file_number),
                FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()),
                FieldValue::Text(owner.into()),
            ],
            shape: Some(Point { x: -121.29, y: 37.95 }),
        }
    }

    #[test]
    fn schema_lists_targets_then_shape() {
        let layer = ParquetLayer::new("unused.parquet", mapping());
        let schema = layer.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["FileNumber", "IssueDate", "OwnerName", "Shape"]);
        assert_eq!(schema.field(0).data_type(), &DataType::Int32);
        assert_eq!(schema.field(1).data_type(), &DataType::Date32);
    }

    #[test]
    fn replace_swaps_whole_snapshot() -> Result<()> {
        let dir = tempdir()?;
        let layer = ParquetLayer::new(dir.path().join("LiquorLicenseLocations.parquet"), mapping());
        assert_eq!(layer.row_count()?, 0);

        layer.replace(&[row(1, "A"), row(2, "B"), row(3, "C")])?;
        assert_eq!(layer.row_count()?, 3);

        layer.replace(&[row(42, "NEW")])?;
        assert_eq!(layer.row_count()?, 1);

        let batches = layer.read_batches()?;
        let batch = &batches[0];
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("FileNumber is Int32");
        assert_eq!(ids.value(0), 42);
        let dates = batch
            .column(1)
            .as_any()
            .downcast_ref::<Date32Array>()
            .expect("IssueDate is Date32");
        assert_eq!(
            dates.value(0),
            days_since_epoch(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        let shape = batch
            .column(3)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("Shape is Utf8");
        assert_eq!(shape.value(0), "POINT (-121.29 37.95)");
        assert!(!dir.path().join("LiquorLicenseLocations.parquet.tmp").exists());
        Ok(())
    }

    #[test]
    fn failed_replace_keeps_previous_snapshot() -> Result<()> {
        let dir = tempdir()?;
        let layer = ParquetLayer::new(dir.path().join("layer.parquet"), mapping());
        layer.replace(&[row(1, "A"), row(2, "B")])?;

        let mut bad = row(3, "C");
        bad.values[0] = FieldValue::Text("not a number".into());
        assert!(layer.replace(&[row(4, "D"), bad]).is_err());

        let mut short = row(5, "E");
        short.values.pop();
        assert!(layer.replace(&[short]).is_err());

        assert_eq!(layer.row_count()?, 2);
        assert!(!dir.path().join("layer.parquet.tmp").exists());
        Ok(())
    }

    #[test]
    fn nulls_survive_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let layer = ParquetLayer::new(dir.path().join("layer.parquet"), mapping());
        layer.replace(&[TargetRow {
            values: vec![FieldValue::Null, FieldValue::Null, FieldValue::Null],
            shape: None,
        }])?;
        let batches = layer.read_batches()?;
        assert!(batches[0].column(0).is_null(0));
        assert!(batches[0].column(3).is_null(0));
        Ok(())
    }

    #[test]
    fn stale_staging_file_is_cleared() -> Result<()> {
        let dir = tempdir()?;
        let layer = ParquetLayer::new(dir.path().join("layer.parquet"), mapping());
        fs::write(dir.path().join("layer.parquet.tmp"), "half written")?;
        layer.replace(&[row(1, "A")])?;
        assert_eq!(layer.row_count()?, 1);
        Ok(())
    }

    #[test]
    fn stale_staging_cleared_under_bracketed_workspace() -> Result<()> {
        let dir = tempdir()?;
        let workspace = dir.path().join("gis [2026]");
        fs::create_dir_all(&workspace)?;
        let layer = ParquetLayer::new(workspace.join("layer.parquet"), mapping());
        let staging = workspace.join("layer.parquet.tmp");
        fs::write(&staging, "half written")?;

        layer.clear_stale_staging();
        assert!(!staging.exists());
        // nothing to clear is not an error
        layer.clear_stale_staging();
        layer.replace(&[row(1, "A")])?;
        assert_eq!(layer.row_count()?, 1);
        Ok(())
    }
}
