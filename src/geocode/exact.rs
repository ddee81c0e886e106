use super::{
    address_key, locator::LocatorArtifact, normalize_unit, sanitize_field_name, unit_key,
    AddressFields, GeocodedRow, GeocodedTable, Geocoder, Point,
};
use crate::error::Result;
use crate::reconcile::MatchStatus;
use crate::table::RawTable;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Looks up `address|city` in a reference locator, trying `address #unit|city`
/// first when the row names a unit the locator knows.
/// One distinct candidate is a match, several are a tie, none is unmatched.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatchGeocoder;

impl Geocoder for ExactMatchGeocoder {
    #[instrument(level = "info", skip_all, fields(rows = addresses.len()))]
    fn geocode(
        &self,
        addresses: &RawTable,
        locator: &Path,
        fields: &AddressFields,
    ) -> Result<GeocodedTable> {
        let context = "addresses to geocode";
        let address = addresses.column_index(&fields.address, context)?;
        let city = addresses.column_index(&fields.city, context)?;
        let unit = fields
            .address2
            .as_deref()
            .map(|name| addresses.column_index(name, context))
            .transpose()?;
        let artifact = LocatorArtifact::load(locator)?;

        let mut out = GeocodedTable::new(
            addresses
                .headers
                .iter()
                .map(|h| sanitize_field_name(h))
                .collect(),
        );

        for row in &addresses.rows {
            let candidates: &[Point] =
                match (RawTable::cell(row, address), RawTable::cell(row, city)) {
                    (Some(street), Some(town)) => {
                        let by_unit = unit
                            .and_then(|idx| RawTable::cell(row, idx))
                            .and_then(normalize_unit)
                            .map(|u| artifact.candidates(&unit_key(street, &u, town)))
                            .unwrap_or(&[]);
                        if by_unit.is_empty() {
                            artifact.candidates(&address_key(street, town))
                        } else {
                            by_unit
                        }
                    }
                    _ => &[],
                };
            let status = match candidates.len() {
                0 => MatchStatus::Unmatched,
                1 => MatchStatus::Matched,
                _ => MatchStatus::Tied,
            };
            if status == MatchStatus::Tied {
                debug!(candidates = candidates.len(), "tied address");
            }
            out.rows.push(GeocodedRow {
                status: status.as_str().to_string(),
                values: row.clone(),
                point: candidates.first().copied(),
            });
        }

        info!(rows = out.rows.len(), "geocoded addresses");
        Ok(out)
    }
}
