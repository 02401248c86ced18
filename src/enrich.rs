//! Attaches station coordinates to normalized records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::stations::StationTable;
use crate::types::{Coordinates, EnrichedRecord, RawRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichReport {
    /// Failed departure or arrival lookups, one per endpoint per record.
    pub unmatched_lookups: usize,
    /// Distinct station names with no reference entry, sorted.
    pub missing_stations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Enriched {
    pub records: Vec<EnrichedRecord>,
    pub report: EnrichReport,
}

/// Resolves departure and arrival coordinates for every record.
///
/// Never drops a record: an unmatched station leaves its coordinates empty.
#[tracing::instrument(skip_all, fields(records = records.len(), stations = stations.len()))]
pub fn enrich(records: Vec<RawRecord>, stations: &StationTable) -> Enriched {
    let mut unmatched_lookups = 0;
    let mut missing = BTreeSet::new();

    let mut resolve = |name: &str| -> Option<Coordinates> {
        match stations.lookup(name) {
            Some(station) => Some(Coordinates::from(station)),
            None => {
                unmatched_lookups += 1;
                missing.insert(name.to_string());
                None
            }
        }
    };

    let records: Vec<EnrichedRecord> = records
        .into_iter()
        .map(|record| {
            let departure_coords = resolve(&record.route.departure);
            let arrival_coords = resolve(&record.route.arrival);
            EnrichedRecord {
                record,
                departure_coords,
                arrival_coords,
            }
        })
        .collect();

    let report = EnrichReport {
        unmatched_lookups,
        missing_stations: missing.into_iter().collect(),
    };

    if !report.missing_stations.is_empty() {
        warn!(
            missing = report.missing_stations.len(),
            unmatched_lookups = report.unmatched_lookups,
            "Some stations have no coordinates"
        );
    }
    info!(records = records.len(), "Enrichment complete");

    Enriched { records, report }
}
