// src/geocode/mod.rs
//! Geocoding collaborator contract and a reference exact-match implementation.

pub mod exact;
pub mod locator;

use crate::error::Result;
use crate::table::RawTable;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use exact::ExactMatchGeocoder;
pub use locator::{LocatorField, LocatorRequest, ReferenceLocatorBuilder};

/// Name of the status column in geocoded output and reports.
pub const STATUS_FIELD: &str = "Status";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn to_wkt(&self) -> String {
        format!("POINT ({} {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedRow {
    /// Raw code as returned by the geocoder; not validated here.
    pub status: String,
    pub values: Vec<String>,
    pub point: Option<Point>,
}

/// One output row per input row. `headers` are the input's field names in
/// geodatabase form and exclude the status column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeocodedTable {
    pub headers: Vec<String>,
    pub rows: Vec<GeocodedRow>,
}

impl GeocodedTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }
}

/// Which input columns carry each address component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressFields {
    pub address: String,
    /// Unit or suite; narrows a street match when the locator knows the unit.
    pub address2: Option<String>,
    pub city: String,
}

impl Default for AddressFields {
    fn default() -> Self {
        Self {
            address: "Prem Addr 1".into(),
            address2: Some("Prem Addr 2".into()),
            city: "Prem City".into(),
        }
    }
}

/// Builds an opaque locator artifact from reference address data.
pub trait LocatorBuilder {
    /// Replace any artifact at `request.output`; returns its path.
    fn build(&self, request: &LocatorRequest) -> Result<PathBuf>;
}

pub trait Geocoder {
    fn geocode(
        &self,
        addresses: &RawTable,
        locator: &Path,
        fields: &AddressFields,
    ) -> Result<GeocodedTable>;
}

static INVALID_FIELD_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("field name pattern should compile"));

/// Field name as the geodatabase stores it: `Prem City` -> `Prem_City`.
pub fn sanitize_field_name(name: &str) -> String {
    let cleaned = INVALID_FIELD_CHARS.replace_all(name.trim(), "_").into_owned();
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("F{}", cleaned)
    } else {
        cleaned
    }
}

/// Upper-case, drop punctuation, collapse whitespace.
pub fn normalize_address(raw: &str) -> String {
    raw.to_uppercase()
        .replace(['.', ','], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const UNIT_DESIGNATORS: &[&str] = &["STE", "SUITE", "UNIT", "APT", "APARTMENT", "SPC", "SPACE", "RM", "ROOM"];

/// `Ste 2`, `Suite 2`, `#2` and `2` all become `2`. `None` when nothing is left.
pub fn normalize_unit(raw: &str) -> Option<String> {
    let normalized = normalize_address(&raw.replace('#', " "));
    let mut tokens: Vec<&str> = normalized.split_whitespace().collect();
    if tokens.len() > 1 && UNIT_DESIGNATORS.contains(&tokens[0]) {
        tokens.remove(0);
    }
    (!tokens.is_empty()).then(|| tokens.join(" "))
}

pub(crate) fn address_key(street: &str, city: &str) -> String {
    format!("{}|{}", normalize_address(street), normalize_address(city))
}

/// Street key narrowed to one unit; `unit` is already normalized.
pub(crate) fn unit_key(street: &str, unit: &str, city: &str) -> String {
    format!(
        "{} #{}|{}",
        normalize_address(street),
        unit,
        normalize_address(city)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_follow_geodatabase_rules() {
        assert_eq!(sanitize_field_name("Prem City"), "Prem_City");
        assert_eq!(sanitize_field_name("Prem Census Tract #"), "Prem_Census_Tract__");
        assert_eq!(sanitize_field_name("File_Number"), "File_Number");
        assert_eq!(sanitize_field_name("2nd Owner"), "F2nd_Owner");
    }

    #[test]
    fn address_normalization_collapses_noise() {
        assert_eq!(normalize_address(" 425 n. El Dorado  St "), "425 N EL DORADO ST");
        assert_eq!(
            address_key("425 N El Dorado St", " stockton"),
            "425 N EL DORADO ST|STOCKTON"
        );
    }

    #[test]
    fn unit_designators_are_dropped() {
        assert_eq!(normalize_unit("Ste 2").as_deref(), Some("2"));
        assert_eq!(normalize_unit("SUITE 2").as_deref(), Some("2"));
        assert_eq!(normalize_unit("#2").as_deref(), Some("2"));
        assert_eq!(normalize_unit("2").as_deref(), Some("2"));
        assert_eq!(normalize_unit("Bldg B").as_deref(), Some("BLDG B"));
        assert_eq!(normalize_unit(" # ").as_deref(), None);
        assert_eq!(
            unit_key("100 Main St", "2", "lodi "),
            "100 MAIN ST #2|LODI"
        );
    }

    #[test]
    fn wkt_point() {
        assert_eq!(Point { x: -121.5, y: 37.95 }.to_wkt(), "POINT (-121.5 37.95)");
    }
}
