//! Runtime settings.
//!
//! Stored as a JSON object on disk; every field is optional:
//! ```json
//! {
//!   "data_path": "data/regularite-mensuelle-tgv-aqst.csv",
//!   "stations_path": "data/stations.csv",
//!   "header_aliases": { "Nb trains prévus": "scheduled" },
//!   "cause_prefixes": ["part cause"]
//! }
//! ```
//! Environment variables (`RAIL_DATA_PATH`, `RAIL_STATIONS_PATH`,
//! `RAIL_SNAPSHOT_PATH`, `RAIL_DATA_URL`) override the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::schema::HeaderMap;

pub const DATA_FILENAME: &str = "regularite-mensuelle-tgv-aqst.csv";
pub const STATIONS_FILENAME: &str = "stations.csv";
pub const SNAPSHOT_FILENAME: &str = "punctuality_snapshot.json.gz";

pub const DEFAULT_DATA_URL: &str = "https://ressources.data.sncf.com/explore/dataset/regularite-mensuelle-tgv-aqst/download/?format=csv&timezone=Europe/Berlin&lang=fr&use_labels_for_header=true&csv_separator=%3B";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_path: PathBuf,
    pub stations_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub data_url: String,
    /// Extra header variants, mapped to a canonical field name or `cause_<name>`.
    pub header_aliases: BTreeMap<String, String>,
    pub cause_prefixes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = Path::new("data");
        Settings {
            data_path: data_dir.join(DATA_FILENAME),
            stations_path: data_dir.join(STATIONS_FILENAME),
            snapshot_path: data_dir.join(SNAPSHOT_FILENAME),
            data_url: DEFAULT_DATA_URL.to_string(),
            header_aliases: BTreeMap::new(),
            cause_prefixes: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads settings from the JSON file at `path` (or defaults when `None`),
    /// then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| PipelineError::from_io(e, path))?;
                debug!(path = %path.display(), "Loaded settings file");
                serde_json::from_str(&content)?
            }
            None => Settings::default(),
        };
        Ok(settings.with_overrides(|name| std::env::var(name).ok()))
    }

    /// Applies overrides looked up by environment variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("RAIL_DATA_PATH") {
            self.data_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("RAIL_STATIONS_PATH") {
            self.stations_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("RAIL_SNAPSHOT_PATH") {
            self.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("RAIL_DATA_URL") {
            self.data_url = v;
        }
        self
    }

    /// Stable text form of the settings that shape the header mapping.
    pub fn header_fingerprint(&self) -> Result<String> {
        Ok(serde_json::to_string(&(&self.header_aliases, &self.cause_prefixes))?)
    }

    /// Builds the header mapping: built-in variants plus configured aliases
    /// and cause prefixes.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] if an alias targets an unknown field.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::default();
        for (variant, target) in &self.header_aliases {
            map = map.with_alias(variant, target).map_err(|e| {
                PipelineError::Config(format!("header alias '{variant}': {e}"))
            })?;
        }
        for prefix in &self.cause_prefixes {
            map = map.with_cause_prefix(prefix);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Field};
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.data_path, Path::new("data/regularite-mensuelle-tgv-aqst.csv"));
        assert_eq!(settings.stations_path, Path::new("data/stations.csv"));
        assert!(settings.data_url.starts_with("https://ressources.data.sncf.com/"));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"stations_path": "ref/gares.csv", "cause_prefixes": ["part cause"]}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.stations_path, Path::new("ref/gares.csv"));
        assert_eq!(settings.cause_prefixes, vec!["part cause"]);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Settings::load(Some(Path::new("/no/such/settings.json")));
        assert!(matches!(result, Err(PipelineError::FileNotFound(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RAIL_DATA_PATH", "/tmp/raw.csv"),
            ("RAIL_DATA_URL", "http://localhost/raw.csv"),
            ("RAIL_STATIONS_PATH", "  "),
        ]
        .into_iter()
        .collect();

        let settings =
            Settings::default().with_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.data_path, Path::new("/tmp/raw.csv"));
        assert_eq!(settings.data_url, "http://localhost/raw.csv");
        assert_eq!(settings.stations_path, Path::new("data/stations.csv"));
    }

    #[test]
    fn test_header_map_with_aliases() {
        let mut settings = Settings::default();
        settings
            .header_aliases
            .insert("Trains programmés".into(), "scheduled".into());
        settings
            .header_aliases
            .insert("Part météo".into(), "cause_weather".into());
        settings.cause_prefixes.push("part cause".into());

        let map = settings.header_map().unwrap();
        assert_eq!(map.resolve("Trains programmés"), Column::Field(Field::Scheduled));
        assert_eq!(map.resolve("Part météo"), Column::Cause("weather".into()));
        assert_eq!(map.resolve("Part cause grève"), Column::Cause("grève".into()));
    }

    #[test]
    fn test_header_fingerprint_tracks_aliases() {
        let mut settings = Settings::default();
        let before = settings.header_fingerprint().unwrap();
        assert_eq!(before, Settings::default().header_fingerprint().unwrap());

        settings.cause_prefixes.push("part cause".into());
        assert_ne!(settings.header_fingerprint().unwrap(), before);
    }

    #[test]
    fn test_header_map_unknown_target() {
        let mut settings = Settings::default();
        settings
            .header_aliases
            .insert("Whatever".into(), "not_a_field".into());
        assert!(matches!(settings.header_map(), Err(PipelineError::Config(_))));
    }
}
