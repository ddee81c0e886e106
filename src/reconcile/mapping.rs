// src/reconcile/mapping.rs

use crate::error::{LicsyncError, Result};
use crate::geocode::{GeocodedTable, Point};
use crate::table::clean_str;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, str::FromStr};

/// Target field types, named as the geodatabase names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Short,
    Long,
    Double,
    Date,
    Text,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Short => "SHORT",
            FieldType::Long => "LONG",
            FieldType::Double => "DOUBLE",
            FieldType::Date => "DATE",
            FieldType::Text => "TEXT",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = LicsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHORT" => Ok(FieldType::Short),
            "LONG" => Ok(FieldType::Long),
            "DOUBLE" => Ok(FieldType::Double),
            "DATE" => Ok(FieldType::Date),
            "TEXT" => Ok(FieldType::Text),
            other => Err(LicsyncError::InvalidMapping(format!(
                "unknown field type {:?}",
                other
            ))),
        }
    }
}

/// One `source -> target : type` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>, ty: FieldType) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Short(i16),
    Long(i32),
    Double(f64),
    Date(NaiveDate),
    Text(String),
}

/// A schema-mapped row ready for the target layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    /// One value per mapping entry, in mapping order.
    pub values: Vec<FieldValue>,
    pub shape: Option<Point>,
}

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d", "%d-%b-%y", "%d-%b-%Y"];

fn parse_date(s: &str) -> Option<NaiveDate> {
    // "3/15/2024 0:00:00" style exports carry a time we do not keep
    let day = s.split_whitespace().next().unwrap_or(s);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day, fmt).ok())
}

/// Convert one raw cell. `None` means the value does not fit `ty`.
pub fn convert(raw: &str, ty: FieldType) -> Option<FieldValue> {
    let s = clean_str(raw);
    if s.is_empty() {
        return Some(FieldValue::Null);
    }
    match ty {
        FieldType::Short => s.parse().ok().map(FieldValue::Short),
        FieldType::Long => s.parse().ok().map(FieldValue::Long),
        FieldType::Double => s.parse().ok().map(FieldValue::Double),
        FieldType::Date => parse_date(&s).map(FieldValue::Date),
        FieldType::Text => Some(FieldValue::Text(s)),
    }
}

/// Ordered, validated list of field mappings.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingTable {
    entries: Vec<FieldMapping>,
}

impl MappingTable {
    pub fn new(entries: Vec<FieldMapping>) -> Result<Self> {
        if entries.is_empty() {
            return Err(LicsyncError::InvalidMapping("mapping table is empty".into()));
        }
        let mut targets = HashSet::new();
        for m in &entries {
            if m.source.trim().is_empty() || m.target.trim().is_empty() {
                return Err(LicsyncError::InvalidMapping(format!(
                    "entry {:?} -> {:?} needs both a source and a target",
                    m.source, m.target
                )));
            }
            if !targets.insert(m.target.as_str()) {
                return Err(LicsyncError::InvalidMapping(format!(
                    "target field `{}` is mapped more than once",
                    m.target
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FieldMapping] {
        &self.entries
    }

    /// Every mapped source must be present in `headers`; returns their positions.
    pub fn require_sources(&self, headers: &[String], context: &str) -> Result<Vec<usize>> {
        self.entries
            .iter()
            .map(|m| {
                headers
                    .iter()
                    .position(|h| h == &m.source)
                    .ok_or_else(|| LicsyncError::MissingColumn {
                        column: m.source.clone(),
                        context: context.to_string(),
                    })
            })
            .collect()
    }

    /// Map every row of `table`; the status field and unmapped fields are dropped.
    /// Row numbers in errors are 1-based.
    pub fn map_rows(&self, table: &GeocodedTable) -> Result<Vec<TargetRow>> {
        let sources = self.require_sources(&table.headers, "geocoded results")?;
        let mut out = Vec::with_capacity(table.rows.len());

        for (row_idx, row) in table.rows.iter().enumerate() {
            let mut values = Vec::with_capacity(self.entries.len());
            for (m, &col) in self.entries.iter().zip(&sources) {
                let raw = row.values.get(col).map(String::as_str).unwrap_or("");
                let value = convert(raw, m.ty).ok_or_else(|| LicsyncError::Mapping {
                    row: row_idx + 1,
                    field: m.source.clone(),
                    value: raw.to_string(),
                    target_type: m.ty.to_string(),
                })?;
                values.push(value);
            }
            out.push(TargetRow {
                values,
                shape: row.point,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::GeocodedRow;
    use anyhow::Result;

    fn table(headers: &[&str], rows: &[&[&str]]) -> GeocodedTable {
        GeocodedTable {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| GeocodedRow {
                    status: "M".into(),
                    values: r.iter().map(|v| v.to_string()).collect(),
                    point: Some(Point { x: 1.0, y: 2.0 }),
                })
                .collect(),
        }
    }

    #[test]
    fn long_field_maps_digits_to_integer() -> Result<()> {
        let mapping = MappingTable::new(vec![FieldMapping::new(
            "File_Number",
            "FileNumber",
            FieldType::Long,
        )])?;
        let rows = mapping.map_rows(&table(&["Owner", "File_Number"], &[&["ACME", "12345"]]))?;
        assert_eq!(rows.len(), 1);
        // unmapped "Owner" is dropped
        assert_eq!(rows[0].values, vec![FieldValue::Long(12345)]);
        assert_eq!(rows[0].shape, Some(Point { x: 1.0, y: 2.0 }));
        Ok(())
    }

    #[test]
    fn non_numeric_long_is_an_error_not_zero() -> Result<()> {
        let mapping = MappingTable::new(vec![FieldMapping::new(
            "File_Number",
            "FileNumber",
            FieldType::Long,
        )])?;
        let err = mapping
            .map_rows(&table(&["File_Number"], &[&["1"], &["12A45"]]))
            .unwrap_err();
        match err {
            LicsyncError::Mapping {
                row, field, value, ..
            } => {
                assert_eq!(row, 2);
                assert_eq!(field, "File_Number");
                assert_eq!(value, "12A45");
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn converts_each_type() {
        assert_eq!(convert("47", FieldType::Short), Some(FieldValue::Short(47)));
        assert_eq!(convert("70000", FieldType::Short), None);
        assert_eq!(
            convert("33.02", FieldType::Double),
            Some(FieldValue::Double(33.02))
        );
        assert_eq!(convert("  ", FieldType::Long), Some(FieldValue::Null));
        assert_eq!(
            convert(" Bob's ", FieldType::Text),
            Some(FieldValue::Text("Bob's".into()))
        );

        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        for raw in ["03/15/2024", "2024-03-15", "15-MAR-24", "15-Mar-2024", "3/15/2024 0:00:00"] {
            assert_eq!(convert(raw, FieldType::Date), Some(FieldValue::Date(d)), "{raw}");
        }
        assert_eq!(convert("soon", FieldType::Date), None);
    }

    #[test]
    fn validation_rejects_bad_tables() {
        assert!(MappingTable::new(vec![]).is_err());
        assert!(MappingTable::new(vec![FieldMapping::new("", "T", FieldType::Text)]).is_err());
        assert!(MappingTable::new(vec![
            FieldMapping::new("A", "T", FieldType::Text),
            FieldMapping::new("B", "T", FieldType::Long),
        ])
        .is_err());
    }

    #[test]
    fn missing_source_is_reported() -> Result<()> {
        let mapping =
            MappingTable::new(vec![FieldMapping::new("Expir_Date", "ExpirationDate", FieldType::Date)])?;
        let err = mapping
            .require_sources(&["File_Number".to_string()], "license export")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing column `Expir_Date` in license export"
        );
        Ok(())
    }

    #[test]
    fn field_type_parses_case_insensitively() -> Result<()> {
        assert_eq!("long".parse::<FieldType>()?, FieldType::Long);
        assert!("BLOB".parse::<FieldType>().is_err());
        Ok(())
    }
}
