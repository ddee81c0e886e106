// src/filter/mod.rs
//! Jurisdiction filter for the raw license export.

use crate::config::{ExportColumns, JurisdictionConfig, MetadataRow};
use crate::error::Result;
use crate::table::{header_cells, pad_row, RawTable};
use csv::ReaderBuilder;
use std::{collections::HashSet, fs::File, io::BufReader, path::Path};
use tracing::{debug, info, instrument};

/// Upper-case then trim, the comparison key for every city field.
pub fn normalize_city(raw: &str) -> String {
    raw.to_uppercase().trim().to_string()
}

fn normalize_zip(raw: &str) -> String {
    raw.trim().chars().take(5).collect()
}

/// Allow-list predicate built once from configuration.
#[derive(Debug, Clone)]
pub struct Jurisdiction {
    core_city: String,
    premise_cities: HashSet<String>,
    include_mailing_city: bool,
    postal_codes: Option<HashSet<String>>,
}

impl Jurisdiction {
    pub fn from_config(cfg: &JurisdictionConfig) -> Self {
        let core_city = normalize_city(&cfg.core_city);
        let mut premise_cities: HashSet<String> = cfg
            .satellite_cities
            .iter()
            .map(|c| normalize_city(c))
            .collect();
        premise_cities.insert(core_city.clone());

        let postal_codes = cfg
            .match_postal_codes
            .then(|| cfg.postal_codes.iter().map(|z| normalize_zip(z)).collect());

        Self {
            core_city,
            premise_cities,
            include_mailing_city: cfg.include_mailing_city,
            postal_codes,
        }
    }

    /// True when the premise city is allowed, or (if enabled) the mailing city
    /// is the core city, or (if enabled) the premise zip is listed.
    /// Missing values never match.
    pub fn matches(
        &self,
        prem_city: Option<&str>,
        mail_city: Option<&str>,
        prem_zip: Option<&str>,
    ) -> bool {
        if let Some(city) = prem_city {
            if self.premise_cities.contains(&normalize_city(city)) {
                return true;
            }
        }
        if self.include_mailing_city {
            if let Some(city) = mail_city {
                if normalize_city(city) == self.core_city {
                    return true;
                }
            }
        }
        if let (Some(codes), Some(zip)) = (&self.postal_codes, prem_zip) {
            let zip = normalize_zip(zip);
            if !zip.is_empty() && codes.contains(&zip) {
                return true;
            }
        }
        false
    }
}

/// Read the raw export, dropping the metadata row according to `layout`.
#[instrument(level = "info", skip(path), fields(path = %path.display()))]
pub fn read_export(path: &Path, layout: MetadataRow) -> Result<RawTable> {
    let file = File::open(path)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));
    let mut records = rdr.records();

    if layout == MetadataRow::BeforeHeader {
        if let Some(rec) = records.next() {
            rec?;
        }
    }
    let headers = match records.next() {
        Some(rec) => header_cells(&rec?),
        None => return Ok(RawTable::default()),
    };
    if layout == MetadataRow::AfterHeader {
        if let Some(rec) = records.next() {
            rec?;
        }
    }

    let mut table = RawTable::new(headers);
    for rec in records {
        let rec = rec?;
        if rec.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        table.rows.push(pad_row(&rec, table.headers.len()));
    }
    debug!(rows = table.len(), columns = table.headers.len(), "read export");
    Ok(table)
}

/// Keep the rows of `table` inside the jurisdiction, preserving order.
pub fn filter_table(
    table: &RawTable,
    columns: &ExportColumns,
    jurisdiction: &Jurisdiction,
) -> Result<RawTable> {
    let prem_city = table.column_index(&columns.prem_city, "license export")?;
    let mail_city = table.column_index(&columns.mail_city, "license export")?;
    let prem_zip = if jurisdiction.postal_codes.is_some() {
        Some(table.column_index(&columns.prem_zip, "license export")?)
    } else {
        None
    };

    let rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .filter(|row| {
            jurisdiction.matches(
                RawTable::cell(row, prem_city),
                RawTable::cell(row, mail_city),
                prem_zip.and_then(|i| RawTable::cell(row, i)),
            )
        })
        .cloned()
        .collect();

    info!(kept = rows.len(), total = table.len(), "filtered export");
    Ok(RawTable {
        headers: table.headers.clone(),
        rows,
    })
}
