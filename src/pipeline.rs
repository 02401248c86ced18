//! End-to-end wiring: source file → normalized → enriched → aggregated.
//!
//! [`Dashboard`] is what a presentation layer holds on to. Every call to
//! [`Dashboard::dataset`] goes through the [`CacheGate`], so repeated render
//! passes over an unchanged source reuse one computed [`Dataset`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::aggregate::{AggregateOptions, AggregateRow, Dimension, Metric, aggregate_with};
use crate::cache::{CacheGate, CacheKey};
use crate::config::Settings;
use crate::enrich::enrich;
use crate::error::{PipelineError, Result};
use crate::filter::{FilterCatalog, RecordFilter};
use crate::parser::load_records;
use crate::quality::QualityReport;
use crate::schema::HeaderMap;
use crate::snapshot::{SourceIdentity, load_fresh, write_snapshot};
use crate::stations::StationTable;
use crate::types::Dataset;

pub struct Dashboard {
    settings: Settings,
    headers: HeaderMap,
    cache: CacheGate<Dataset>,
}

impl Dashboard {
    /// # Errors
    ///
    /// [`PipelineError::Config`] if the configured header aliases are invalid.
    pub fn new(settings: Settings) -> Result<Self> {
        let headers = settings.header_map()?;
        Ok(Dashboard {
            settings,
            headers,
            cache: CacheGate::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the dataset for the current version of the source file.
    ///
    /// # Errors
    ///
    /// [`PipelineError::FileNotFound`] if the source file is missing,
    /// [`PipelineError::DatasetEmpty`] if no row could be parsed.
    pub fn dataset(&mut self) -> Result<Arc<Dataset>> {
        let key = self.cache_key()?;
        let settings = &self.settings;
        let headers = &self.headers;
        self.cache.get_or_compute(&key, || build_dataset(settings, headers))
    }

    /// Drops the memoized dataset and the on-disk snapshot.
    pub fn refresh(&mut self) -> Result<()> {
        match self.cache_key() {
            Ok(key) => {
                self.cache.invalidate(&key);
            }
            Err(_) => self.cache.clear(),
        }

        match std::fs::remove_file(&self.settings.snapshot_path) {
            Ok(()) => {
                info!(path = %self.settings.snapshot_path.display(), "Snapshot removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn cache_key(&self) -> Result<CacheKey> {
        Ok(CacheKey::for_source(&self.settings.data_path)?
            .with_dependency(&self.settings.stations_path))
    }

    /// Filters the dataset and aggregates what remains.
    ///
    /// # Errors
    ///
    /// [`PipelineError::EmptyInput`] when the filter leaves no record.
    pub fn aggregate(
        &mut self,
        filter: &RecordFilter,
        group_by: &[Dimension],
        metrics: &[Metric],
        options: &AggregateOptions,
    ) -> Result<Vec<AggregateRow>> {
        let dataset = self.dataset()?;
        let selected = filter.apply(&dataset.records);
        aggregate_with(&selected, group_by, metrics, options)
    }

    pub fn quality(&mut self) -> Result<QualityReport> {
        Ok(QualityReport::build(&self.dataset()?.records))
    }

    pub fn catalog(&mut self) -> Result<FilterCatalog> {
        Ok(FilterCatalog::from_records(&self.dataset()?.records))
    }
}

#[tracing::instrument(skip_all, fields(source = %settings.data_path.display()))]
fn build_dataset(settings: &Settings, headers: &HeaderMap) -> Result<Dataset> {
    let source = SourceIdentity::capture(
        &settings.data_path,
        &settings.stations_path,
        settings.header_fingerprint()?,
    )?;
    if let Some(dataset) = load_fresh(&settings.snapshot_path, &source)? {
        info!(records = dataset.records.len(), "Using snapshot");
        return Ok(dataset);
    }

    let stations = load_stations(settings)?;
    let normalized = load_records(&settings.data_path, headers)?;
    let enriched = enrich(normalized.records, &stations);

    let dataset = Dataset {
        records: enriched.records,
        normalize: normalized.report,
        enrichment: enriched.report,
    };

    if let Err(e) = write_snapshot(&settings.snapshot_path, &source, &dataset) {
        warn!(
            path = %settings.snapshot_path.display(),
            error = %e,
            "Failed to write snapshot"
        );
    }

    Ok(dataset)
}

/// A missing or malformed station file degrades to an empty table.
fn load_stations(settings: &Settings) -> Result<StationTable> {
    match StationTable::load(&settings.stations_path) {
        Ok(table) => Ok(table),
        Err(e @ (PipelineError::FileNotFound(_) | PipelineError::MissingColumn(_))) => {
            warn!(error = %e, "Station reference unavailable, coordinates will be empty");
            Ok(StationTable::default())
        }
        Err(e) => Err(e),
    }
}
