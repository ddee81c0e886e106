// src/pipeline/mod.rs
//! Sequential run: fetch, filter, locate, geocode, split, report, publish, clean up.

use crate::config::Config;
use crate::fetch::{self, FetchPolicy};
use crate::filter::{filter_table, read_export, Jurisdiction};
use crate::geocode::{sanitize_field_name, Geocoder, LocatorBuilder, LocatorRequest};
use crate::reconcile::{split, write_unmatched_report};
use crate::store::TargetStore;
use crate::table::write_table;
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{info, warn};

const TOTAL_STEPS: usize = 8;

/// Where the raw export comes from.
#[derive(Debug, Clone)]
pub enum Source {
    File(PathBuf),
    Url(String),
}

impl Source {
    /// Explicit path wins, then explicit URL, then the configured URL.
    pub fn resolve(input: Option<PathBuf>, url: Option<String>, config: &Config) -> Result<Self> {
        match (input, url.or_else(|| config.source.url.clone())) {
            (Some(path), _) => Ok(Source::File(path)),
            (None, Some(url)) => Ok(Source::Url(url)),
            (None, None) => anyhow::bail!("no export given: pass --input or --url, or set source.url"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub input_rows: usize,
    pub filtered_rows: usize,
    pub matched: usize,
    pub tied: usize,
    pub unmatched: usize,
    pub published: usize,
    pub report: PathBuf,
}

/// Wires the configuration to the external collaborators.
pub struct Pipeline<'a> {
    config: &'a Config,
    locator_builder: &'a dyn LocatorBuilder,
    geocoder: &'a dyn Geocoder,
    store: &'a dyn TargetStore,
}

fn step<T>(n: usize, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let out = f().with_context(|| format!("step {}/{} ({}) failed", n, TOTAL_STEPS, name))?;
    info!(step = n, total = TOTAL_STEPS, elapsed = ?start.elapsed(), "{} done", name);
    Ok(out)
}

/// Best-effort removal; failures only affect housekeeping.
pub fn remove_intermediates(paths: &[PathBuf]) {
    for path in paths {
        if !path.exists() {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "deleted intermediate"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete intermediate"),
        }
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        locator_builder: &'a dyn LocatorBuilder,
        geocoder: &'a dyn Geocoder,
        store: &'a dyn TargetStore,
    ) -> Self {
        Self {
            config,
            locator_builder,
            geocoder,
            store,
        }
    }

    fn locator_request(&self) -> Result<LocatorRequest> {
        let cfg = &self.config.locator;
        Ok(LocatorRequest {
            country_code: cfg.country_code.clone(),
            reference_data: self.config.reference_data_path(),
            field_mapping: cfg.parsed_fields()?,
            output: self.config.locator_path(),
            language: cfg.language.clone(),
        })
    }

    /// Rebuild the locator on its own.
    pub fn build_locator(&self) -> Result<PathBuf> {
        let request = self.locator_request()?;
        Ok(self.locator_builder.build(&request)?)
    }

    fn obtain_export(&self, source: &Source, intermediates: &mut Vec<PathBuf>) -> Result<PathBuf> {
        match source {
            Source::File(path) => {
                if !path.is_file() {
                    anyhow::bail!("export {} does not exist", path.display());
                }
                Ok(path.clone())
            }
            Source::Url(url) => {
                let policy = FetchPolicy::from(&self.config.source);
                let client = fetch::build_client(&policy)?;
                let zip_path = fetch::download_zip(&client, url, &self.config.work_dir, &policy)?;
                intermediates.push(zip_path.clone());
                let csv_path = fetch::extract_single_csv(&zip_path, &self.config.work_dir)?;
                intermediates.push(csv_path.clone());
                Ok(csv_path)
            }
        }
    }

    /// Run every step in order. Nothing touches the target store before step 7,
    /// and an export missing a mapped column fails in step 2.
    pub fn run(&self, source: &Source) -> Result<RunSummary> {
        let config = self.config;
        let mapping = config.mapping_table()?;
        fs::create_dir_all(&config.work_dir)
            .with_context(|| format!("creating work directory {:?}", config.work_dir))?;
        let mut intermediates: Vec<PathBuf> = Vec::new();
        let mut summary = RunSummary::default();

        let export = step(1, "fetch export", || {
            self.obtain_export(source, &mut intermediates)
        })?;

        let filtered = step(2, "filter export", || {
            let raw = read_export(&export, config.export.metadata_row)?;
            summary.input_rows = raw.len();
            // mapped sources are checked under the names the geocoder will emit
            let emitted: Vec<String> = raw
                .headers
                .iter()
                .map(|h| sanitize_field_name(h))
                .collect();
            mapping.require_sources(&emitted, "license export")?;
            let jurisdiction = Jurisdiction::from_config(&config.jurisdiction);
            let filtered = filter_table(&raw, &config.export.columns, &jurisdiction)?;
            let path = config.work_dir.join("filtered_licenses.csv");
            write_table(&filtered, &path)?;
            intermediates.push(path);
            Ok(filtered)
        })?;
        summary.filtered_rows = filtered.len();

        let locator = step(3, "build locator", || self.build_locator())?;
        intermediates.push(locator.clone());

        let geocoded = step(4, "geocode addresses", || {
            Ok(self
                .geocoder
                .geocode(&filtered, &locator, &config.address_fields)?)
        })?;

        let partition = step(5, "split matched/unmatched", || Ok(split(&geocoded)?))?;
        summary.matched = partition.matched.rows.len();
        summary.tied = partition.tied;
        summary.unmatched = partition.unmatched.rows.len();

        summary.report = config.report_path();
        step(6, "report unmatched", || {
            Ok(write_unmatched_report(&partition.unmatched, &summary.report)?)
        })?;

        summary.published = step(7, "publish matched", || {
            let rows = mapping.map_rows(&partition.matched)?;
            self.store.replace(&rows)
        })?;

        step(8, "clean up", || {
            if config.keep_intermediates {
                info!(count = intermediates.len(), "keeping intermediates");
            } else {
                remove_intermediates(&intermediates);
            }
            Ok(())
        })?;

        info!(?summary, "run complete");
        Ok(summary)
    }
}

/// Filter a local export into `output` without geocoding.
pub fn filter_only(config: &Config, input: &Path, output: &Path) -> Result<usize> {
    let raw = read_export(input, config.export.metadata_row)
        .with_context(|| format!("reading export {}", input.display()))?;
    let jurisdiction = Jurisdiction::from_config(&config.jurisdiction);
    let filtered = filter_table(&raw, &config.export.columns, &jurisdiction)?;
    write_table(&filtered, output)?;
    Ok(filtered.len())
}
