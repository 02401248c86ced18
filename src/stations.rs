//! Station coordinate reference table.

use std::collections::HashMap;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::{PipelineError, Result};
use crate::types::StationRef;

/// Join key for station names: accents stripped, `-` and `’` folded,
/// whitespace collapsed, lowercased.
///
/// `"lyon "`, `"Lyon"` and `"LYON"` share a key, as do `"Besançon"` and
/// `"BESANCON"`.
pub fn station_key(name: &str) -> String {
    let folded: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            '-' => ' ',
            '’' => '\'',
            other => other,
        })
        .collect();
    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Read-only lookup of station coordinates by normalized name.
#[derive(Debug, Clone, Default)]
pub struct StationTable {
    by_key: HashMap<String, StationRef>,
    /// Entries dropped because their key was already present.
    pub duplicates: usize,
    /// Rows dropped because of missing names or unparseable coordinates.
    pub skipped: usize,
}

impl StationTable {
    /// Builds a table in memory. The first entry wins on duplicate keys.
    pub fn from_refs(refs: impl IntoIterator<Item = StationRef>) -> Self {
        let mut table = StationTable::default();
        for station in refs {
            table.insert(station);
        }
        table
    }

    /// Loads `station,lat,lon` rows. Header names are matched
    /// case-insensitively and `name`, `latitude`, `lng`, `longitude` are
    /// accepted as well.
    ///
    /// # Errors
    ///
    /// [`PipelineError::FileNotFound`] when the file does not exist and
    /// [`PipelineError::MissingColumn`] when a required header is absent.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| PipelineError::from_io(e, path))?;
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(file);

        let headers = rdr.headers()?.clone();
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
        };
        let name_idx = find(&["station", "name"]).ok_or(PipelineError::MissingColumn("station"))?;
        let lat_idx = find(&["lat", "latitude"]).ok_or(PipelineError::MissingColumn("lat"))?;
        let lon_idx =
            find(&["lon", "lng", "longitude"]).ok_or(PipelineError::MissingColumn("lon"))?;

        let mut table = StationTable::default();

        for result in rdr.records() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    debug!(error = %e, "Station row could not be decoded");
                    table.skipped += 1;
                    continue;
                }
            };

            let name = row.get(name_idx).map(str::trim).unwrap_or("");
            let lat = row.get(lat_idx).and_then(|v| v.trim().parse::<f64>().ok());
            let lon = row.get(lon_idx).and_then(|v| v.trim().parse::<f64>().ok());

            match (lat, lon) {
                (Some(lat), Some(lon))
                    if !name.is_empty() && lat.is_finite() && lon.is_finite() =>
                {
                    table.insert(StationRef {
                        name: name.to_string(),
                        lat,
                        lon,
                    });
                }
                _ => {
                    debug!(station = name, "Skipping station row with bad coordinates");
                    table.skipped += 1;
                }
            }
        }

        info!(
            stations = table.len(),
            duplicates = table.duplicates,
            skipped = table.skipped,
            "Station table loaded"
        );
        Ok(table)
    }

    fn insert(&mut self, station: StationRef) {
        let key = station_key(&station.name);
        if let Some(existing) = self.by_key.get(&key) {
            warn!(
                station = %station.name,
                kept = %existing.name,
                "Duplicate station name, keeping first entry"
            );
            self.duplicates += 1;
            return;
        }
        self.by_key.insert(key, station);
    }

    pub fn lookup(&self, name: &str) -> Option<&StationRef> {
        self.by_key.get(&station_key(name))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
