//! Record selection shared by the dashboard pages.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::stations::station_key;
use crate::types::{DurationClass, EnrichedRecord, Period, RawRecord};

/// Selection of records by period range, service and stations.
///
/// Empty lists place no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub from: Option<Period>,
    pub to: Option<Period>,
    pub services: Vec<String>,
    pub departures: Vec<String>,
    pub arrivals: Vec<String>,
    pub duration_classes: Vec<DurationClass>,
    /// Match selected stations at either end of the route.
    pub bidirectional: bool,
}

impl RecordFilter {
    pub fn matches(&self, r: &RawRecord) -> bool {
        if self.from.is_some_and(|from| r.period < from) {
            return false;
        }
        if self.to.is_some_and(|to| r.period > to) {
            return false;
        }
        if !self.duration_classes.is_empty()
            && !self.duration_classes.contains(&r.duration_class())
        {
            return false;
        }
        if !self.services.is_empty() {
            let Some(service) = &r.service else {
                return false;
            };
            if !self
                .services
                .iter()
                .any(|s| s.trim().eq_ignore_ascii_case(service.trim()))
            {
                return false;
            }
        }

        let dep = station_key(&r.route.departure);
        let arr = station_key(&r.route.arrival);
        let selected = |names: &[String], key: &str| {
            names.iter().any(|n| station_key(n) == key)
        };

        if self.bidirectional {
            let dep_ok = self.departures.is_empty()
                || selected(&self.departures, &dep)
                || selected(&self.departures, &arr);
            let arr_ok = self.arrivals.is_empty()
                || selected(&self.arrivals, &dep)
                || selected(&self.arrivals, &arr);
            dep_ok && arr_ok
        } else {
            (self.departures.is_empty() || selected(&self.departures, &dep))
                && (self.arrivals.is_empty() || selected(&self.arrivals, &arr))
        }
    }

    pub fn apply(&self, records: &[EnrichedRecord]) -> Vec<EnrichedRecord> {
        records
            .iter()
            .filter(|r| self.matches(&r.record))
            .cloned()
            .collect()
    }
}

/// Distinct values available for filtering, sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterCatalog {
    pub periods: Vec<Period>,
    pub services: Vec<String>,
    pub departures: Vec<String>,
    pub arrivals: Vec<String>,
    /// Fixed list, independent of the records.
    pub duration_classes: Vec<DurationClass>,
}

impl FilterCatalog {
    pub fn from_records(records: &[EnrichedRecord]) -> Self {
        let mut periods = BTreeSet::new();
        let mut services = BTreeSet::new();
        let mut departures = BTreeSet::new();
        let mut arrivals = BTreeSet::new();

        for r in records.iter().map(|r| &r.record) {
            periods.insert(r.period);
            if let Some(s) = &r.service {
                services.insert(s.clone());
            }
            departures.insert(r.route.departure.clone());
            arrivals.insert(r.route.arrival.clone());
        }

        FilterCatalog {
            periods: periods.into_iter().collect(),
            services: services.into_iter().collect(),
            departures: departures.into_iter().collect(),
            arrivals: arrivals.into_iter().collect(),
            duration_classes: DurationClass::KNOWN.to_vec(),
        }
    }

    pub fn first_period(&self) -> Option<Period> {
        self.periods.first().copied()
    }

    pub fn last_period(&self) -> Option<Period> {
        self.periods.last().copied()
    }
}
