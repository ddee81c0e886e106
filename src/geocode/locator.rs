// src/geocode/locator.rs

use super::{address_key, normalize_unit, unit_key, LocatorBuilder, Point};
use crate::error::{LicsyncError, Result};
use crate::table::{read_table, RawTable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, instrument, warn};

/// Address roles a reference dataset can supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    HouseNumber,
    PrefixDirection,
    StreetName,
    SuffixType,
    FullStreetName,
    Unit,
    City,
    X,
    Y,
}

impl FromStr for Role {
    type Err = LicsyncError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "HouseNumber" => Role::HouseNumber,
            "PrefixDirection" => Role::PrefixDirection,
            "StreetName" => Role::StreetName,
            "SuffixType" => Role::SuffixType,
            // older scripts spell it with three e's
            "FullStreetName" | "FullStreeetName" => Role::FullStreetName,
            "Unit" => Role::Unit,
            "City" => Role::City,
            "X" => Role::X,
            "Y" => Role::Y,
            other => {
                return Err(LicsyncError::Locator(format!(
                    "unknown locator role {:?}",
                    other
                )))
            }
        })
    }
}

/// One `Role FROM Field` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorField {
    pub role: Role,
    pub field: String,
}

impl FromStr for LocatorField {
    type Err = LicsyncError;

    fn from_str(s: &str) -> Result<Self> {
        let (role, field) = s
            .split_once(" FROM ")
            .ok_or_else(|| LicsyncError::Locator(format!("expected `Role FROM Field`, got {:?}", s)))?;
        let field = field.trim();
        if field.is_empty() {
            return Err(LicsyncError::Locator(format!("no source field in {:?}", s)));
        }
        Ok(LocatorField {
            role: role.trim().parse()?,
            field: field.to_string(),
        })
    }
}

/// Parameters handed to a `LocatorBuilder`.
#[derive(Debug, Clone)]
pub struct LocatorRequest {
    pub country_code: String,
    pub reference_data: PathBuf,
    pub field_mapping: Vec<LocatorField>,
    pub output: PathBuf,
    pub language: String,
}

/// On-disk form of the reference locator.
#[derive(Debug, Serialize, Deserialize)]
pub struct LocatorArtifact {
    pub country_code: String,
    pub language: String,
    pub built_at: DateTime<Utc>,
    /// `ADDRESS|CITY` and `ADDRESS #UNIT|CITY` -> distinct candidate points.
    pub entries: BTreeMap<String, Vec<Point>>,
}

impl LocatorArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| LicsyncError::Locator(format!("reading {}: {}", path.display(), e)))
    }

    pub fn candidates(&self, key: &str) -> &[Point] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Builds a JSON locator from a reference address CSV.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceLocatorBuilder;

struct RoleColumns {
    columns: Vec<(Role, usize)>,
}

impl RoleColumns {
    fn new(table: &RawTable, mapping: &[LocatorField]) -> Result<Self> {
        let columns = mapping
            .iter()
            .map(|m| Ok((m.role, table.column_index(&m.field, "reference addresses")?)))
            .collect::<Result<Vec<_>>>()?;
        for required in [Role::City, Role::X, Role::Y] {
            if !columns.iter().any(|(r, _)| *r == required) {
                return Err(LicsyncError::Locator(format!(
                    "field mapping has no {:?} entry",
                    required
                )));
            }
        }
        Ok(Self { columns })
    }

    fn get<'r>(&self, row: &'r [String], role: Role) -> Option<&'r str> {
        self.columns
            .iter()
            .find(|(r, _)| *r == role)
            .and_then(|(_, idx)| RawTable::cell(row, *idx))
    }

    fn street(&self, row: &[String]) -> Option<String> {
        if let Some(full) = self.get(row, Role::FullStreetName) {
            return Some(full.to_string());
        }
        let parts: Vec<&str> = [
            Role::HouseNumber,
            Role::PrefixDirection,
            Role::StreetName,
            Role::SuffixType,
        ]
        .iter()
        .filter_map(|role| self.get(row, *role))
        .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

fn parse_coord(raw: Option<&str>, axis: &str, row: usize) -> Result<f64> {
    raw.and_then(|s| s.trim().parse().ok()).ok_or_else(|| {
        LicsyncError::Locator(format!(
            "reference row {}: invalid {} coordinate {:?}",
            row,
            axis,
            raw.unwrap_or("")
        ))
    })
}

impl LocatorBuilder for ReferenceLocatorBuilder {
    #[instrument(level = "info", skip(self, request), fields(output = %request.output.display()))]
    fn build(&self, request: &LocatorRequest) -> Result<PathBuf> {
        if request.output.exists() {
            fs::remove_file(&request.output)?;
            info!("removed previous locator");
        }

        let reference = read_table(&request.reference_data)?;
        let roles = RoleColumns::new(&reference, &request.field_mapping)?;

        let mut entries: BTreeMap<String, Vec<Point>> = BTreeMap::new();
        let mut skipped = 0usize;
        for (idx, row) in reference.rows.iter().enumerate() {
            let (Some(street), Some(city)) = (roles.street(row), roles.get(row, Role::City)) else {
                skipped += 1;
                continue;
            };
            let point = Point {
                x: parse_coord(roles.get(row, Role::X), "X", idx + 1)?,
                y: parse_coord(roles.get(row, Role::Y), "Y", idx + 1)?,
            };
            let mut keys = vec![address_key(&street, city)];
            if let Some(unit) = roles.get(row, Role::Unit).and_then(normalize_unit) {
                keys.push(unit_key(&street, &unit, city));
            }
            for key in keys {
                let candidates = entries.entry(key).or_default();
                if !candidates.contains(&point) {
                    candidates.push(point);
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, "reference rows without street or city");
        }

        let artifact = LocatorArtifact {
            country_code: request.country_code.clone(),
            language: request.language.clone(),
            built_at: Utc::now(),
            entries,
        };
        if let Some(parent) = request.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&request.output)?);
        serde_json::to_writer(&mut writer, &artifact)
            .map_err(|e| LicsyncError::Locator(format!("writing locator: {}", e)))?;
        writer.flush()?;

        info!(keys = artifact.entries.len(), "built locator");
        Ok(request.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn default_mapping() -> Vec<LocatorField> {
        crate::config::LocatorConfig::default()
            .parsed_fields()
            .expect("default locator mapping parses")
    }

    #[test]
    fn parses_role_from_field() -> Result<()> {
        let f: LocatorField = "HouseNumber FROM AddressNumber".parse()?;
        assert_eq!(f.role, Role::HouseNumber);
        assert_eq!(f.field, "AddressNumber");

        let legacy: LocatorField = "FullStreeetName FROM FullAddress".parse()?;
        assert_eq!(legacy.role, Role::FullStreetName);

        assert!("HouseNumber AddressNumber".parse::<LocatorField>().is_err());
        assert!("Planet FROM Earth".parse::<LocatorField>().is_err());
        assert!("State FROM State".parse::<LocatorField>().is_err());
        Ok(())
    }

    #[test]
    fn rebuild_replaces_old_artifact() -> Result<()> {
        let dir = tempdir()?;
        let reference = dir.path().join("Addresses.csv");
        fs::write(
            &reference,
            "AddressNumber,StreetDirectional,StreetName,StreetType,FullAddress,Suite,City,State,POINT_X,POINT_Y\n\
             425,N,El Dorado,St,,,Stockton,CA,-121.29,37.95\n\
             ,,,,100 Main St,,Stockton,CA,-121.30,37.96\n\
             ,,,,100 Main St,,Stockton,CA,-121.31,37.97\n\
             ,,,,100 Main St,,Stockton,CA,-121.31,37.97\n\
             ,,,,,,Stockton,CA,0,0\n",
        )?;
        let output = dir.path().join("ABCLocator.loc");
        fs::write(&output, "stale")?;

        let request = LocatorRequest {
            country_code: "USA".into(),
            reference_data: reference,
            field_mapping: default_mapping(),
            output: output.clone(),
            language: "ENG".into(),
        };
        let path = ReferenceLocatorBuilder.build(&request)?;
        assert_eq!(path, output);

        let artifact = LocatorArtifact::load(&path)?;
        assert_eq!(artifact.entries.len(), 2);
        assert_eq!(artifact.candidates("425 N EL DORADO ST|STOCKTON").len(), 1);
        assert_eq!(artifact.candidates("100 MAIN ST|STOCKTON").len(), 2);
        assert!(artifact.candidates("1 NOWHERE|STOCKTON").is_empty());
        Ok(())
    }

    #[test]
    fn units_get_their_own_key() -> Result<()> {
        let dir = tempdir()?;
        let reference = dir.path().join("Addresses.csv");
        fs::write(
            &reference,
            "AddressNumber,StreetDirectional,StreetName,StreetType,FullAddress,Suite,City,State,POINT_X,POINT_Y\n\
             ,,,,100 Main St,,Lodi,CA,-121.27,38.13\n\
             ,,,,100 Main St,Suite 2,Lodi,CA,-121.28,38.14\n",
        )?;
        let request = LocatorRequest {
            country_code: "USA".into(),
            reference_data: reference,
            field_mapping: default_mapping(),
            output: dir.path().join("ABCLocator.loc"),
            language: "ENG".into(),
        };
        let artifact = LocatorArtifact::load(&ReferenceLocatorBuilder.build(&request)?)?;
        assert_eq!(artifact.candidates("100 MAIN ST|LODI").len(), 2);
        assert_eq!(
            artifact.candidates("100 MAIN ST #2|LODI"),
            &[Point { x: -121.28, y: 38.14 }]
        );
        Ok(())
    }

    #[test]
    fn bad_coordinate_is_a_locator_error() -> Result<()> {
        let dir = tempdir()?;
        let reference = dir.path().join("Addresses.csv");
        fs::write(
            &reference,
            "AddressNumber,StreetDirectional,StreetName,StreetType,FullAddress,Suite,City,State,POINT_X,POINT_Y\n\
             1,,Main,St,,,Stockton,CA,west,37.9\n",
        )?;
        let request = LocatorRequest {
            country_code: "USA".into(),
            reference_data: reference,
            field_mapping: default_mapping(),
            output: dir.path().join("out.loc"),
            language: "ENG".into(),
        };
        let err = ReferenceLocatorBuilder.build(&request).unwrap_err();
        assert!(err.to_string().contains("X coordinate"));
        Ok(())
    }
}
