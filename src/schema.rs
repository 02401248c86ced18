//! Canonical field names and the header mapping table.
//!
//! Dataset versions differ in how they label columns (French labels in the
//! SNCF open-data export, English snake_case names in cleaned exports, short
//! aliases in hand-made files). [`HeaderMap`] resolves every known variant to a
//! canonical [`Field`] or to a delay-cause category.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// Canonical scalar columns of a [`RawRecord`](crate::types::RawRecord).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Period,
    Service,
    Departure,
    Arrival,
    JourneyMinutes,
    Scheduled,
    Cancelled,
    LateDepartures,
    Delayed,
    AvgDelay,
    AvgDelayAll,
    LateOver15,
    LateOver30,
    LateOver60,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Period,
        Field::Service,
        Field::Departure,
        Field::Arrival,
        Field::JourneyMinutes,
        Field::Scheduled,
        Field::Cancelled,
        Field::LateDepartures,
        Field::Delayed,
        Field::AvgDelay,
        Field::AvgDelayAll,
        Field::LateOver15,
        Field::LateOver30,
        Field::LateOver60,
    ];

    pub const REQUIRED: [Field; 3] = [Field::Period, Field::Departure, Field::Arrival];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Period => "period",
            Field::Service => "service",
            Field::Departure => "departure",
            Field::Arrival => "arrival",
            Field::JourneyMinutes => "journey_minutes",
            Field::Scheduled => "scheduled",
            Field::Cancelled => "cancelled",
            Field::LateDepartures => "late_departures",
            Field::Delayed => "delayed",
            Field::AvgDelay => "avg_delay",
            Field::AvgDelayAll => "avg_delay_all",
            Field::LateOver15 => "late_over_15",
            Field::LateOver30 => "late_over_30",
            Field::LateOver60 => "late_over_60",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        Field::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| PipelineError::Config(format!("unknown field '{s}'")))
    }
}

/// Known header variants per field.
static FIELD_VARIANTS: &[(Field, &[&str])] = &[
    (Field::Period, &["Date", "period", "mois", "month"]),
    (Field::Service, &["Service"]),
    (
        Field::Departure,
        &["Gare de départ", "dep", "departure_station"],
    ),
    (
        Field::Arrival,
        &["Gare d'arrivée", "arr", "arrival_station"],
    ),
    (
        Field::JourneyMinutes,
        &["Durée moyenne du trajet", "avg_duration_min"],
    ),
    (
        Field::Scheduled,
        &["Nombre de circulations prévues", "planned"],
    ),
    (Field::Cancelled, &["Nombre de trains annulés", "canceled"]),
    (
        Field::LateDepartures,
        &["Nombre de trains en retard au départ", "late_depart_count"],
    ),
    (
        Field::Delayed,
        &["Nombre de trains en retard à l'arrivée", "late_arr_count"],
    ),
    (
        Field::AvgDelay,
        &[
            "Retard moyen des trains en retard à l'arrivée",
            "avg_delay_arr_delayed_min",
        ],
    ),
    (
        Field::AvgDelayAll,
        &[
            "Retard moyen de tous les trains à l'arrivée",
            "avg_delay_arr_all_min",
        ],
    ),
    (
        Field::LateOver15,
        &["Nombre trains en retard > 15min", "late_over_15_count"],
    ),
    (
        Field::LateOver30,
        &["Nombre trains en retard > 30min", "late_over_30_count"],
    ),
    (
        Field::LateOver60,
        &["Nombre trains en retard > 60min", "late_over_60_count"],
    ),
];

/// Stable category names for the cause columns of the SNCF export.
static CAUSE_VARIANTS: &[(&str, &[&str])] = &[
    (
        "external",
        &["Prct retard pour causes externes", "pct_cause_external"],
    ),
    (
        "infrastructure",
        &["Prct retard pour cause infrastructure", "pct_cause_infra"],
    ),
    (
        "traffic_management",
        &["Prct retard pour cause gestion trafic", "pct_cause_traffic"],
    ),
    (
        "rolling_stock",
        &[
            "Prct retard pour cause matériel roulant",
            "pct_cause_rollingstock",
        ],
    ),
    (
        "station_operations",
        &[
            "Prct retard pour cause gestion en gare et réutilisation de matériel",
            "pct_cause_station_reuse",
        ],
    ),
    (
        "passengers",
        &[
            "Prct retard pour cause prise en compte voyageurs (affluence, gestions PSH, correspondances)",
            "pct_cause_passengers",
        ],
    ),
];

static DEFAULT_CAUSE_PREFIXES: &[&str] = &["Prct retard pour cause", "pct_cause_", "cause_"];

/// What a header resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Field(Field),
    Cause(String),
    Ignored,
}

/// Mapping table from source header variants to canonical columns.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    fields: HashMap<String, Field>,
    causes: HashMap<String, String>,
    cause_prefixes: Vec<String>,
}

impl Default for HeaderMap {
    fn default() -> Self {
        let mut map = HeaderMap::empty();
        for field in Field::ALL {
            map.fields.insert(header_key(field.name()), field);
        }
        for (field, variants) in FIELD_VARIANTS {
            for v in *variants {
                map.fields.insert(header_key(v), *field);
            }
        }
        for (cause, variants) in CAUSE_VARIANTS {
            for v in *variants {
                map.causes.insert(header_key(v), cause.to_string());
            }
        }
        for p in DEFAULT_CAUSE_PREFIXES {
            map.cause_prefixes.push(header_key(p));
        }
        map
    }
}

impl HeaderMap {
    /// A map that recognizes nothing. Mostly useful in tests.
    pub fn empty() -> Self {
        HeaderMap {
            fields: HashMap::new(),
            causes: HashMap::new(),
            cause_prefixes: Vec::new(),
        }
    }

    /// Adds a header variant. `target` is a canonical field name
    /// (`"scheduled"`) or a cause category written as `cause_<name>`.
    pub fn with_alias(mut self, variant: &str, target: &str) -> Result<Self> {
        let key = header_key(variant);
        match target.trim().strip_prefix("cause_") {
            Some(cause) if !cause.is_empty() => {
                self.causes.insert(key, slug(cause));
            }
            _ => {
                let field: Field = target.parse()?;
                self.fields.insert(key, field);
            }
        }
        Ok(self)
    }

    pub fn with_cause_prefix(mut self, prefix: &str) -> Self {
        let key = header_key(prefix);
        if !key.is_empty() && !self.cause_prefixes.contains(&key) {
            self.cause_prefixes.push(key);
        }
        self
    }

    pub fn resolve(&self, header: &str) -> Column {
        let key = header_key(header);
        if let Some(field) = self.fields.get(&key) {
            return Column::Field(*field);
        }
        if let Some(cause) = self.causes.get(&key) {
            return Column::Cause(cause.clone());
        }
        for prefix in &self.cause_prefixes {
            if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                let name = slug(rest);
                if !name.is_empty() {
                    return Column::Cause(name);
                }
            }
        }
        Column::Ignored
    }
}

/// Lookup key for a header: trimmed, typographic apostrophes folded,
/// whitespace collapsed, lowercased.
fn header_key(header: &str) -> String {
    header
        .replace('’', "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Turns free text into a snake_case category name.
fn slug(raw: &str) -> String {
    let mut out = String::new();
    for c in raw.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_french_labels() {
        let map = HeaderMap::default();
        assert_eq!(map.resolve("Date"), Column::Field(Field::Period));
        assert_eq!(map.resolve("Gare de départ"), Column::Field(Field::Departure));
        assert_eq!(
            map.resolve("Nombre de circulations prévues"),
            Column::Field(Field::Scheduled)
        );
    }

    #[test]
    fn test_resolve_typographic_apostrophe_and_case() {
        let map = HeaderMap::default();
        assert_eq!(map.resolve("  GARE D’ARRIVÉE "), Column::Field(Field::Arrival));
    }

    #[test]
    fn test_resolve_canonical_and_aliases() {
        let map = HeaderMap::default();
        assert_eq!(map.resolve("period"), Column::Field(Field::Period));
        assert_eq!(map.resolve("dep"), Column::Field(Field::Departure));
        assert_eq!(map.resolve("delayed"), Column::Field(Field::Delayed));
        assert_eq!(map.resolve("canceled"), Column::Field(Field::Cancelled));
    }

    #[test]
    fn test_resolve_known_causes() {
        let map = HeaderMap::default();
        assert_eq!(
            map.resolve("Prct retard pour causes externes"),
            Column::Cause("external".into())
        );
        assert_eq!(
            map.resolve("pct_cause_rollingstock"),
            Column::Cause("rolling_stock".into())
        );
    }

    #[test]
    fn test_resolve_unknown_cause_by_prefix() {
        let map = HeaderMap::default();
        assert_eq!(
            map.resolve("Prct retard pour cause Météo extrême"),
            Column::Cause("météo_extrême".into())
        );
        assert_eq!(map.resolve("cause_weather"), Column::Cause("weather".into()));
    }

    #[test]
    fn test_resolve_ignored() {
        let map = HeaderMap::default();
        assert_eq!(map.resolve("Commentaire annulations"), Column::Ignored);
        assert_eq!(map.resolve("cause_"), Column::Ignored);
    }

    #[test]
    fn test_with_alias() {
        let map = HeaderMap::default()
            .with_alias("Trains programmés", "scheduled")
            .unwrap()
            .with_alias("Part météo", "cause_weather")
            .unwrap();
        assert_eq!(map.resolve("trains programmés"), Column::Field(Field::Scheduled));
        assert_eq!(map.resolve("Part météo"), Column::Cause("weather".into()));
    }

    #[test]
    fn test_with_alias_unknown_field() {
        let result = HeaderMap::default().with_alias("x", "not_a_field");
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_with_cause_prefix() {
        let map = HeaderMap::empty().with_cause_prefix("share_");
        assert_eq!(map.resolve("share_strikes"), Column::Cause("strikes".into()));
        assert_eq!(map.resolve("period"), Column::Ignored);
    }
}
