use crate::error::{LicsyncError, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use tempfile::NamedTempFile;

/// An in-memory delimited table: one header row plus string cells.
/// Empty cells are treated as nulls by the accessors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `name` in the header, or `MissingColumn` naming it.
    pub fn column_index(&self, name: &str, context: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LicsyncError::MissingColumn {
                column: name.to_string(),
                context: context.to_string(),
            })
    }

    /// Cell value, `None` for a short row or an empty cell.
    pub fn cell<'a>(row: &'a [String], idx: usize) -> Option<&'a str> {
        row.get(idx).map(String::as_str).filter(|s| !s.is_empty())
    }
}

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Read a plain delimited file whose first record is the header.
pub fn read_table(path: &Path) -> Result<RawTable> {
    let file = File::open(path)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut records = rdr.records();
    let headers = match records.next() {
        Some(rec) => header_cells(&rec?),
        None => return Ok(RawTable::default()),
    };
    let mut table = RawTable::new(headers);
    for rec in records {
        table.rows.push(pad_row(&rec?, table.headers.len()));
    }
    Ok(table)
}

/// Write `headers` and `rows` to `path`, replacing any existing file.
/// The content is staged next to the destination and renamed into place.
pub fn write_rows<I, R>(path: &Path, headers: &[String], rows: I) -> Result<()>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    {
        let mut wtr = WriterBuilder::new().from_writer(staged.as_file_mut());
        wtr.write_record(headers)?;
        for row in rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
    }
    staged.as_file_mut().flush()?;
    staged.persist(path).map_err(|e| LicsyncError::Io(e.error))?;
    Ok(())
}

pub fn write_table(table: &RawTable, path: &Path) -> Result<()> {
    write_rows(path, &table.headers, &table.rows)
}

pub(crate) fn header_cells(record: &csv::StringRecord) -> Vec<String> {
    record
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
            h.trim().to_string()
        })
        .collect()
}

pub(crate) fn pad_row(record: &csv::StringRecord, width: usize) -> Vec<String> {
    let mut row: Vec<String> = record.iter().map(str::to_string).collect();
    if row.len() < width {
        row.resize(width, String::new());
    }
    row
}
