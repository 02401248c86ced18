//! On-disk snapshot of a computed [`Dataset`].
//!
//! Stored as gzip-compressed JSON: a [`SourceIdentity`] header followed by the
//! dataset. A snapshot is only used while its identity matches the current
//! inputs; anything else means rebuild.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::types::Dataset;

/// Everything a dataset was built from: both input files with their
/// modification times and the header mapping settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub data_path: PathBuf,
    pub data_modified: Option<SystemTime>,
    pub stations_path: PathBuf,
    /// `None` when the station file does not exist.
    pub stations_modified: Option<SystemTime>,
    pub header_config: String,
}

impl SourceIdentity {
    /// # Errors
    ///
    /// [`PipelineError::FileNotFound`] if the data file does not exist. A
    /// missing station file is recorded, not an error.
    pub fn capture(
        data_path: &Path,
        stations_path: &Path,
        header_config: impl Into<String>,
    ) -> Result<Self> {
        let data_meta = fs::metadata(data_path).map_err(|e| PipelineError::from_io(e, data_path))?;
        let stations_modified = fs::metadata(stations_path)
            .ok()
            .and_then(|m| m.modified().ok());

        Ok(SourceIdentity {
            data_path: canonical(data_path),
            data_modified: data_meta.modified().ok(),
            stations_path: canonical(stations_path),
            stations_modified,
            header_config: header_config.into(),
        })
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Serialize)]
struct SnapshotOut<'a> {
    source: &'a SourceIdentity,
    dataset: &'a Dataset,
}

#[derive(Deserialize)]
struct SnapshotIn {
    source: SourceIdentity,
    dataset: Dataset,
}

/// Writes `dataset` and the identity of its inputs to `path`, creating
/// parent directories.
#[tracing::instrument(skip_all, fields(path = %path.display(), records = dataset.records.len()))]
pub fn write_snapshot(path: &Path, source: &SourceIdentity, dataset: &Dataset) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, &SnapshotOut { source, dataset })?;
    encoder.finish()?.flush()?;

    info!("Snapshot written");
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<(SourceIdentity, Dataset)> {
    let file = File::open(path).map_err(|e| PipelineError::from_io(e, path))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let snapshot: SnapshotIn = serde_json::from_reader(decoder)?;
    Ok((snapshot.source, snapshot.dataset))
}

/// Returns the snapshot at `snapshot` if it was built from exactly `source`.
/// A missing or corrupt snapshot, or one built from other inputs, is stale.
pub fn load_fresh(snapshot: &Path, source: &SourceIdentity) -> Result<Option<Dataset>> {
    match fs::metadata(snapshot) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %snapshot.display(), "No snapshot");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    match read_snapshot(snapshot) {
        Ok((identity, dataset)) if identity == *source => {
            debug!(records = dataset.records.len(), "Snapshot loaded");
            Ok(Some(dataset))
        }
        Ok((identity, _)) => {
            info!(
                path = %snapshot.display(),
                built_from = %identity.data_path.display(),
                "Snapshot built from other inputs, rebuilding"
            );
            Ok(None)
        }
        Err(e) => {
            warn!(path = %snapshot.display(), error = %e, "Unreadable snapshot, rebuilding");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::EnrichReport;
    use crate::parser::NormalizeReport;
    use crate::types::{Coordinates, EnrichedRecord, Period, RawRecord, Route};
    use std::time::Duration;

    #[test]
    fn test_snapshot_preserves_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _) = sources(dir.path());
        let path = dir.path().join("nested/snapshot.json.gz");

        write_snapshot(&path, &source, &dataset()).unwrap();
        let (identity, back) = read_snapshot(&path).unwrap();

        assert_eq!(identity, source);
        assert_eq!(back.records, dataset().records);
        assert_eq!(back.normalize, dataset().normalize);
        assert_eq!(back.enrichment, dataset().enrichment);
    }

    #[test]
    fn test_load_fresh_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _) = sources(dir.path());

        let result = load_fresh(&dir.path().join("snapshot.json.gz"), &source).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_fresh_matching_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _) = sources(dir.path());
        let snapshot = dir.path().join("snapshot.json.gz");
        write_snapshot(&snapshot, &source, &dataset()).unwrap();

        let loaded = load_fresh(&snapshot, &source).unwrap().unwrap();
        assert_eq!(loaded.records.len(), 1);
    }

    #[test]
    fn test_load_fresh_edited_source_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (source, data) = sources(dir.path());
        let snapshot = dir.path().join("snapshot.json.gz");
        write_snapshot(&snapshot, &source, &dataset()).unwrap();

        touch(&data, SystemTime::now() + Duration::from_secs(60));
        let current = SourceIdentity::capture(&data, &dir.path().join("stations.csv"), "").unwrap();

        assert!(load_fresh(&snapshot, &current).unwrap().is_none());
    }

    #[test]
    fn test_load_fresh_other_source_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _) = sources(dir.path());
        let snapshot = dir.path().join("snapshot.json.gz");
        write_snapshot(&snapshot, &source, &dataset()).unwrap();

        // an older file, so a timestamp comparison alone would accept the snapshot
        let other = dir.path().join("other.csv");
        fs::write(&other, "period,dep,arr\n").unwrap();
        touch(&other, SystemTime::now() - Duration::from_secs(3600));
        let current =
            SourceIdentity::capture(&other, &dir.path().join("stations.csv"), "").unwrap();

        assert!(load_fresh(&snapshot, &current).unwrap().is_none());
    }

    #[test]
    fn test_load_fresh_station_change_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (source, data) = sources(dir.path());
        let snapshot = dir.path().join("snapshot.json.gz");
        write_snapshot(&snapshot, &source, &dataset()).unwrap();

        let stations = dir.path().join("stations.csv");
        fs::write(&stations, "station,lat,lon\nLyon,45.76,4.86\n").unwrap();
        let current = SourceIdentity::capture(&data, &stations, "").unwrap();

        assert!(load_fresh(&snapshot, &current).unwrap().is_none());
    }

    #[test]
    fn test_load_fresh_header_config_change_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (source, data) = sources(dir.path());
        let snapshot = dir.path().join("snapshot.json.gz");
        write_snapshot(&snapshot, &source, &dataset()).unwrap();

        let current =
            SourceIdentity::capture(&data, &dir.path().join("stations.csv"), "aliases").unwrap();

        assert!(load_fresh(&snapshot, &current).unwrap().is_none());
    }

    #[test]
    fn test_load_fresh_corrupt_snapshot_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _) = sources(dir.path());
        let snapshot = dir.path().join("snapshot.json.gz");
        fs::write(&snapshot, b"not gzip").unwrap();

        assert!(load_fresh(&snapshot, &source).unwrap().is_none());
    }

    #[test]
    fn test_capture_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let result = SourceIdentity::capture(
            &dir.path().join("raw.csv"),
            &dir.path().join("stations.csv"),
            "",
        );
        assert!(matches!(result, Err(PipelineError::FileNotFound(_))));
    }

    #[test]
    fn test_capture_missing_stations() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _) = sources(dir.path());
        assert!(source.stations_modified.is_none());
    }

    // Helper functions for tests
    fn sources(dir: &Path) -> (SourceIdentity, PathBuf) {
        let data = dir.join("raw.csv");
        fs::write(&data, "period,dep,arr\n").unwrap();
        let source = SourceIdentity::capture(&data, &dir.join("stations.csv"), "").unwrap();
        (source, data)
    }

    fn touch(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn dataset() -> Dataset {
        let mut record = RawRecord::new(Period::new(2023, 1).unwrap(), Route::new("Paris", "Lyon"));
        record.scheduled = Some(100);
        record.avg_delay = Some(12.5);
        record.causes.insert("external".into(), Some(40.0));
        record.causes.insert("infrastructure".into(), None);

        Dataset {
            records: vec![EnrichedRecord {
                record,
                departure_coords: Some(Coordinates { lat: 48.84, lon: 2.37 }),
                arrival_coords: None,
            }],
            normalize: NormalizeReport {
                total_rows: 2,
                rows_parsed: 1,
                rows_excluded: 1,
                clamped_cause_values: 0,
                cause_categories: vec!["external".into(), "infrastructure".into()],
            },
            enrichment: EnrichReport {
                unmatched_lookups: 1,
                missing_stations: vec!["Lyon".into()],
            },
        }
    }
}
