// src/config.rs

use crate::error::{LicsyncError, Result};
use crate::geocode::{locator::LocatorField, AddressFields};
use crate::reconcile::mapping::{FieldMapping, FieldType, MappingTable};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Where the export's metadata row sits relative to its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataRow {
    #[default]
    AfterHeader,
    BeforeHeader,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportColumns {
    pub prem_city: String,
    pub mail_city: String,
    pub prem_zip: String,
}

impl Default for ExportColumns {
    fn default() -> Self {
        Self {
            prem_city: "Prem City".into(),
            mail_city: "Mail City".into(),
            prem_zip: "Prem Zip".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExportConfig {
    pub metadata_row: MetadataRow,
    pub columns: ExportColumns,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JurisdictionConfig {
    pub core_city: String,
    pub satellite_cities: Vec<String>,
    /// Also keep rows whose mailing city is the core city.
    pub include_mailing_city: bool,
    pub match_postal_codes: bool,
    pub postal_codes: Vec<String>,
}

impl Default for JurisdictionConfig {
    fn default() -> Self {
        Self {
            core_city: "STOCKTON".into(),
            satellite_cities: vec!["FRENCH CAMP".into(), "LODI".into()],
            include_mailing_city: true,
            match_postal_codes: false,
            postal_codes: [
                "95202", "95203", "95204", "95205", "95206", "95207", "95209", "95210", "95211",
                "95212", "95215", "95219", "95231", "95240", "95242", "95330", "95336",
            ]
            .iter()
            .map(|z| z.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Zip archive holding the weekly export; used when no local file is given.
    pub url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub country_code: String,
    pub language: String,
    /// Reference address table, relative to the workspace unless absolute.
    pub reference_data: PathBuf,
    /// Locator artifact, relative to the work directory unless absolute.
    pub output: PathBuf,
    /// `Role FROM Field` entries.
    pub field_mapping: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            country_code: "USA".into(),
            language: "ENG".into(),
            reference_data: PathBuf::from("Addresses.csv"),
            output: PathBuf::from("ABCLocator.loc"),
            field_mapping: [
                "HouseNumber FROM AddressNumber",
                "PrefixDirection FROM StreetDirectional",
                "StreetName FROM StreetName",
                "SuffixType FROM StreetType",
                "FullStreetName FROM FullAddress",
                "Unit FROM Suite",
                "City FROM City",
                "X FROM POINT_X",
                "Y FROM POINT_Y",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl LocatorConfig {
    pub fn parsed_fields(&self) -> Result<Vec<LocatorField>> {
        self.field_mapping
            .iter()
            .map(|entry| entry.parse())
            .collect()
    }
}

/// Run-wide settings. Built once at startup and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the reference addresses, the layer and the report.
    pub workspace: PathBuf,
    pub layer: String,
    /// Scratch directory for intermediate artifacts.
    pub work_dir: PathBuf,
    pub report_name: String,
    pub keep_intermediates: bool,
    pub export: ExportConfig,
    pub jurisdiction: JurisdictionConfig,
    pub source: SourceConfig,
    pub locator: LocatorConfig,
    pub address_fields: AddressFields,
    pub field_map: Vec<FieldMapping>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            layer: "LiquorLicenseLocations".into(),
            work_dir: PathBuf::from("work"),
            report_name: "unmatched_addresses.csv".into(),
            keep_intermediates: false,
            export: ExportConfig::default(),
            jurisdiction: JurisdictionConfig::default(),
            source: SourceConfig::default(),
            locator: LocatorConfig::default(),
            address_fields: AddressFields::default(),
            field_map: default_field_map(),
        }
    }
}

impl Config {
    /// Load a YAML config; absent keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&text)
            .map_err(|e| LicsyncError::Config(format!("{}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layer.trim().is_empty() {
            return Err(LicsyncError::Config("layer name is empty".into()));
        }
        if self.jurisdiction.core_city.trim().is_empty() {
            return Err(LicsyncError::Config("core city is empty".into()));
        }
        if self.source.timeout_secs == 0 {
            return Err(LicsyncError::Config("source timeout must be positive".into()));
        }
        if let Some(url) = &self.source.url {
            url::Url::parse(url)
                .map_err(|e| LicsyncError::Config(format!("source url {:?}: {}", url, e)))?;
        }
        self.locator.parsed_fields()?;
        self.mapping_table()?;
        Ok(())
    }

    pub fn mapping_table(&self) -> Result<MappingTable> {
        MappingTable::new(self.field_map.clone())
    }

    pub fn layer_path(&self) -> PathBuf {
        self.workspace.join(format!("{}.parquet", self.layer))
    }

    pub fn report_path(&self) -> PathBuf {
        self.workspace.join(&self.report_name)
    }

    pub fn reference_data_path(&self) -> PathBuf {
        resolve(&self.workspace, &self.locator.reference_data)
    }

    pub fn locator_path(&self) -> PathBuf {
        resolve(&self.work_dir, &self.locator.output)
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn default_field_map() -> Vec<FieldMapping> {
    [
        ("File_Number", "FileNumber", FieldType::Long),
        ("License_Type", "LicenseType", FieldType::Short),
        ("Type_Status", "LicenseStatus", FieldType::Text),
        ("Orig_Iss_Date", "IssueDate", FieldType::Date),
        ("Expir_Date", "ExpirationDate", FieldType::Date),
        ("Primary_Name", "OwnerName", FieldType::Text),
        ("Prem_Addr_1", "PremAddress", FieldType::Text),
        ("Prem_Addr_2", "PremAddress2", FieldType::Text),
        ("Prem_City", "PremCity", FieldType::Text),
        ("Prem_Zip", "PremZip", FieldType::Text),
        ("Mail_Addr_1", "MailAddress", FieldType::Text),
        ("Mail_Addr_2", "MailAddress2", FieldType::Text),
        ("Mail_City", "MailCity", FieldType::Text),
        ("Mail_State", "MailState", FieldType::Text),
        ("Mail_Zip", "MailZip", FieldType::Text),
        ("Prem_Census_Tract__", "CensusTract", FieldType::Double),
    ]
    .into_iter()
    .map(|(source, target, ty)| FieldMapping::new(source, target, ty))
    .collect()
}
