//! Record types shared by the normalization, enrichment and aggregation stages.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::enrich::EnrichReport;
use crate::parser::NormalizeReport;
use crate::stats::haversine_km;

/// A monthly reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Period { year, month })
    }

    /// Parses `YYYY-MM`, `YYYY-MM-DD` or `YYYY/MM`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d"))
            .or_else(|_| NaiveDate::parse_from_str(&format!("{raw}/01"), "%Y/%m/%d"))
            .ok()?;
        Some(Period {
            year: date.year(),
            month: date.month(),
        })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Period::parse(&value).ok_or_else(|| format!("invalid period '{value}'"))
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}

/// Origin/destination pair ("liaison") of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Route {
    pub departure: String,
    pub arrival: String,
}

impl Route {
    pub fn new(departure: impl Into<String>, arrival: impl Into<String>) -> Self {
        Route {
            departure: departure.into(),
            arrival: arrival.into(),
        }
    }

    /// Same route with endpoints in lexicographic order, so A→B and B→A collapse.
    pub fn undirected(&self) -> Route {
        if self.departure <= self.arrival {
            self.clone()
        } else {
            Route::new(self.arrival.clone(), self.departure.clone())
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.departure, self.arrival)
    }
}

/// One normalized row of the monthly punctuality dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub period: Period,
    pub route: Route,
    pub service: Option<String>,

    // counts
    pub scheduled: Option<u64>,
    pub cancelled: Option<u64>,
    pub delayed: Option<u64>,
    pub late_departures: Option<u64>,
    pub late_over_15: Option<u64>,
    pub late_over_30: Option<u64>,
    pub late_over_60: Option<u64>,

    // durations, minutes
    pub avg_delay: Option<f64>,
    pub avg_delay_all: Option<f64>,
    pub journey_minutes: Option<f64>,

    /// Percentage of the row's delay per cause category.
    pub causes: BTreeMap<String, Option<f64>>,
    pub causes_clamped: bool,
}

impl RawRecord {
    /// Record with only its identifying fields set.
    pub fn new(period: Period, route: Route) -> Self {
        RawRecord {
            period,
            route,
            service: None,
            scheduled: None,
            cancelled: None,
            delayed: None,
            late_departures: None,
            late_over_15: None,
            late_over_30: None,
            late_over_60: None,
            avg_delay: None,
            avg_delay_all: None,
            journey_minutes: None,
            causes: BTreeMap::new(),
            causes_clamped: false,
        }
    }

    /// Trains that actually ran: scheduled minus cancelled, floored at zero.
    pub fn circulated(&self) -> Option<u64> {
        self.scheduled
            .map(|s| s.saturating_sub(self.cancelled.unwrap_or(0)))
    }

    pub fn duration_class(&self) -> DurationClass {
        DurationClass::of(self.journey_minutes)
    }
}

/// Journey length bucket of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DurationClass {
    /// Under 90 minutes.
    Short,
    /// 90 to 180 minutes inclusive.
    Medium,
    Long,
    Unknown,
}

impl DurationClass {
    /// The classes a journey time can fall into, shortest first.
    pub const KNOWN: [DurationClass; 3] =
        [DurationClass::Short, DurationClass::Medium, DurationClass::Long];

    pub fn of(journey_minutes: Option<f64>) -> Self {
        match journey_minutes {
            Some(m) if m.is_finite() && m < 90.0 => DurationClass::Short,
            Some(m) if m.is_finite() && m <= 180.0 => DurationClass::Medium,
            Some(m) if m.is_finite() => DurationClass::Long,
            _ => DurationClass::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DurationClass::Short => "< 1h30",
            DurationClass::Medium => "1h30–3h",
            DurationClass::Long => "> 3h",
            DurationClass::Unknown => "unknown",
        }
    }

    /// Accepts the label or the variant name (`short`, `medium`, `long`,
    /// `unknown`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        [
            DurationClass::Short,
            DurationClass::Medium,
            DurationClass::Long,
            DurationClass::Unknown,
        ]
        .into_iter()
        .find(|c| c.label() == raw || format!("{c:?}").eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for DurationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<String> for DurationClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DurationClass::parse(&value).ok_or_else(|| format!("invalid duration class '{value}'"))
    }
}

impl From<DurationClass> for String {
    fn from(c: DurationClass) -> Self {
        c.label().to_string()
    }
}

/// Static station reference entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRef {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        haversine_km(self.lat, self.lon, other.lat, other.lon)
    }
}

impl From<&StationRef> for Coordinates {
    fn from(s: &StationRef) -> Self {
        Coordinates {
            lat: s.lat,
            lon: s.lon,
        }
    }
}

/// A [`RawRecord`] with resolved station coordinates, when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub record: RawRecord,
    pub departure_coords: Option<Coordinates>,
    pub arrival_coords: Option<Coordinates>,
}

impl EnrichedRecord {
    pub fn distance_km(&self) -> Option<f64> {
        match (&self.departure_coords, &self.arrival_coords) {
            (Some(a), Some(b)) => Some(a.distance_km(b)),
            _ => None,
        }
    }
}

/// Normalized and enriched dataset together with its diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub records: Vec<EnrichedRecord>,
    pub normalize: NormalizeReport,
    pub enrichment: EnrichReport,
}
