//! Grouped summary statistics over enriched records.
//!
//! Records are partitioned by a combination of [`Dimension`]s and every group
//! gets the requested [`Metric`]s. Groups are emitted in first-seen input
//! order and sums accumulate in input order, so identical input always yields
//! identical tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::stats::{clamp, mean, ratio};
use crate::types::{DurationClass, EnrichedRecord, Period, RawRecord, Route};

/// A categorical axis records can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Period,
    Route,
    Cause,
    /// Journey length bucket, see [`DurationClass`].
    Duration,
}

impl Dimension {
    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Period => "period",
            Dimension::Route => "route",
            Dimension::Cause => "cause",
            Dimension::Duration => "duration",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dimension {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "period" => Ok(Dimension::Period),
            "route" => Ok(Dimension::Route),
            "cause" => Ok(Dimension::Cause),
            "duration" => Ok(Dimension::Duration),
            _ => Err(PipelineError::InvalidDimension(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// (scheduled - delayed) / scheduled
    PunctualityRate,
    /// Mean of the per-record average arrival delay of late trains.
    MeanDelay,
    /// Share of delay attributed to each cause category.
    CauseShare,
    /// cancelled / scheduled
    CancelRate,
    /// Summed service counts.
    Counts,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::PunctualityRate => "punctuality_rate",
            Metric::MeanDelay => "mean_delay",
            Metric::CauseShare => "cause_share",
            Metric::CancelRate => "cancel_rate",
            Metric::Counts => "counts",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "punctuality_rate" => Ok(Metric::PunctualityRate),
            "mean_delay" => Ok(Metric::MeanDelay),
            "cause_share" => Ok(Metric::CauseShare),
            "cancel_rate" => Ok(Metric::CancelRate),
            "counts" => Ok(Metric::Counts),
            _ => Err(PipelineError::InvalidMetric(s.to_string())),
        }
    }
}

/// Parses dimension names, failing on the first unsupported one.
pub fn parse_dimensions<S: AsRef<str>>(names: &[S]) -> Result<Vec<Dimension>> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

pub fn parse_metrics<S: AsRef<str>>(names: &[S]) -> Result<Vec<Metric>> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

/// One component of a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "dimension", content = "value", rename_all = "snake_case")]
pub enum KeyPart {
    Period(Period),
    Route(Route),
    Cause(String),
    Duration(DurationClass),
}

impl KeyPart {
    pub fn dimension(&self) -> Dimension {
        match self {
            KeyPart::Period(_) => Dimension::Period,
            KeyPart::Route(_) => Dimension::Route,
            KeyPart::Cause(_) => Dimension::Cause,
            KeyPart::Duration(_) => Dimension::Duration,
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Period(p) => write!(f, "{p}"),
            KeyPart::Route(r) => write!(f, "{r}"),
            KeyPart::Cause(c) => f.write_str(c),
            KeyPart::Duration(d) => write!(f, "{d}"),
        }
    }
}

/// Grouping key. Parts keep the requested dimension order for display;
/// equality and hashing ignore that order.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct GroupKey {
    parts: Vec<KeyPart>,
}

impl GroupKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        GroupKey { parts }
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn get(&self, dimension: Dimension) -> Option<&KeyPart> {
        self.parts.iter().find(|p| p.dimension() == dimension)
    }

    pub fn period(&self) -> Option<Period> {
        match self.get(Dimension::Period) {
            Some(KeyPart::Period(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn route(&self) -> Option<&Route> {
        match self.get(Dimension::Route) {
            Some(KeyPart::Route(r)) => Some(r),
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self.get(Dimension::Cause) {
            Some(KeyPart::Cause(c)) => Some(c),
            _ => None,
        }
    }

    pub fn duration(&self) -> Option<DurationClass> {
        match self.get(Dimension::Duration) {
            Some(KeyPart::Duration(d)) => Some(*d),
            _ => None,
        }
    }

    fn canonical(&self) -> Vec<&KeyPart> {
        let mut parts: Vec<&KeyPart> = self.parts.iter().collect();
        parts.sort_by_key(|p| p.dimension());
        parts
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("all");
        }
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub scheduled: u64,
    pub cancelled: u64,
    pub delayed: u64,
    pub late_over_15: u64,
    pub late_over_30: u64,
    pub late_over_60: u64,
}

/// Computed value of one metric for one group. Undefined values are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "metric", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    PunctualityRate(Option<f64>),
    MeanDelay(Option<f64>),
    CauseShare(BTreeMap<String, f64>),
    CancelRate(Option<f64>),
    Counts(Counts),
}

impl MetricValue {
    pub fn metric(&self) -> Metric {
        match self {
            MetricValue::PunctualityRate(_) => Metric::PunctualityRate,
            MetricValue::MeanDelay(_) => Metric::MeanDelay,
            MetricValue::CauseShare(_) => Metric::CauseShare,
            MetricValue::CancelRate(_) => Metric::CancelRate,
            MetricValue::Counts(_) => Metric::Counts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub key: GroupKey,
    pub record_count: usize,
    pub metrics: Vec<MetricValue>,
}

impl AggregateRow {
    pub fn punctuality_rate(&self) -> Option<f64> {
        self.metrics.iter().find_map(|m| match m {
            MetricValue::PunctualityRate(v) => *v,
            _ => None,
        })
    }

    pub fn mean_delay(&self) -> Option<f64> {
        self.metrics.iter().find_map(|m| match m {
            MetricValue::MeanDelay(v) => *v,
            _ => None,
        })
    }

    pub fn cancel_rate(&self) -> Option<f64> {
        self.metrics.iter().find_map(|m| match m {
            MetricValue::CancelRate(v) => *v,
            _ => None,
        })
    }

    pub fn cause_share(&self) -> Option<&BTreeMap<String, f64>> {
        self.metrics.iter().find_map(|m| match m {
            MetricValue::CauseShare(v) => Some(v),
            _ => None,
        })
    }

    pub fn counts(&self) -> Option<&Counts> {
        self.metrics.iter().find_map(|m| match m {
            MetricValue::Counts(v) => Some(v),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Treat A→B and B→A as one route.
    pub undirected_routes: bool,
}

/// Groups `records` by `group_by` and computes `metrics` for every group.
///
/// # Errors
///
/// [`PipelineError::EmptyInput`] when `records` is empty,
/// [`PipelineError::NoCauseColumns`] when grouping by cause over records
/// without cause columns.
pub fn aggregate(
    records: &[EnrichedRecord],
    group_by: &[Dimension],
    metrics: &[Metric],
) -> Result<Vec<AggregateRow>> {
    aggregate_with(records, group_by, metrics, &AggregateOptions::default())
}

#[tracing::instrument(skip(records), fields(records = records.len()))]
pub fn aggregate_with(
    records: &[EnrichedRecord],
    group_by: &[Dimension],
    metrics: &[Metric],
    options: &AggregateOptions,
) -> Result<Vec<AggregateRow>> {
    if records.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let mut dims: Vec<Dimension> = Vec::with_capacity(group_by.len());
    for d in group_by {
        if !dims.contains(d) {
            dims.push(*d);
        }
    }
    let mut requested: Vec<Metric> = Vec::with_capacity(metrics.len());
    for m in metrics {
        if !requested.contains(m) {
            requested.push(*m);
        }
    }

    let categories: Vec<String> = records
        .iter()
        .flat_map(|r| r.record.causes.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let by_cause = dims.contains(&Dimension::Cause);
    if by_cause && categories.is_empty() {
        return Err(PipelineError::NoCauseColumns);
    }

    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<GroupAcc> = Vec::new();

    for enriched in records {
        let record = &enriched.record;
        let route = if options.undirected_routes {
            record.route.undirected()
        } else {
            record.route.clone()
        };

        let causes: Vec<Option<&str>> = if by_cause {
            categories.iter().map(|c| Some(c.as_str())).collect()
        } else {
            vec![None]
        };

        for cause in causes {
            let key = build_key(&dims, record, &route, cause);
            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    groups.push(GroupAcc::new(key.clone()));
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            groups[slot].add(record, cause);
        }
    }

    let rows: Vec<AggregateRow> = groups
        .into_iter()
        .map(|g| g.finish(&categories, &requested))
        .collect();

    debug!(groups = rows.len(), "Aggregation complete");
    Ok(rows)
}

fn build_key(dims: &[Dimension], record: &RawRecord, route: &Route, cause: Option<&str>) -> GroupKey {
    let parts = dims
        .iter()
        .map(|d| match d {
            Dimension::Period => KeyPart::Period(record.period),
            Dimension::Duration => KeyPart::Duration(record.duration_class()),
            Dimension::Route => KeyPart::Route(route.clone()),
            Dimension::Cause => KeyPart::Cause(cause.unwrap_or_default().to_string()),
        })
        .collect();
    GroupKey::new(parts)
}

/// Running sums for one group.
struct GroupAcc {
    key: GroupKey,
    records: usize,
    // only records where both operands are present
    rate_scheduled: u64,
    rate_delayed: u64,
    cancel_scheduled: u64,
    cancel_cancelled: u64,
    delays: Vec<f64>,
    counts: Counts,
    cause_delay: BTreeMap<String, f64>,
}

impl GroupAcc {
    fn new(key: GroupKey) -> Self {
        GroupAcc {
            key,
            records: 0,
            rate_scheduled: 0,
            rate_delayed: 0,
            cancel_scheduled: 0,
            cancel_cancelled: 0,
            delays: Vec::new(),
            counts: Counts::default(),
            cause_delay: BTreeMap::new(),
        }
    }

    /// `only_cause` restricts cause attribution to one category.
    fn add(&mut self, r: &RawRecord, only_cause: Option<&str>) {
        self.records += 1;

        if let (Some(s), Some(d)) = (r.scheduled, r.delayed) {
            self.rate_scheduled = self.rate_scheduled.saturating_add(s);
            self.rate_delayed = self.rate_delayed.saturating_add(d);
        }
        if let (Some(s), Some(c)) = (r.scheduled, r.cancelled) {
            self.cancel_scheduled = self.cancel_scheduled.saturating_add(s);
            self.cancel_cancelled = self.cancel_cancelled.saturating_add(c);
        }
        if let Some(delay) = r.avg_delay {
            self.delays.push(delay);
        }

        let c = &mut self.counts;
        c.scheduled = c.scheduled.saturating_add(r.scheduled.unwrap_or(0));
        c.cancelled = c.cancelled.saturating_add(r.cancelled.unwrap_or(0));
        c.delayed = c.delayed.saturating_add(r.delayed.unwrap_or(0));
        c.late_over_15 = c.late_over_15.saturating_add(r.late_over_15.unwrap_or(0));
        c.late_over_30 = c.late_over_30.saturating_add(r.late_over_30.unwrap_or(0));
        c.late_over_60 = c.late_over_60.saturating_add(r.late_over_60.unwrap_or(0));

        // cause values are percentages of the row's delay, weighted by its late trains
        let weight = r.delayed.unwrap_or(0) as f64;
        for (name, value) in &r.causes {
            if only_cause.is_some_and(|only| only != name) {
                continue;
            }
            let share = value.unwrap_or(0.0) / 100.0;
            *self.cause_delay.entry(name.clone()).or_insert(0.0) += share * weight;
        }
    }

    fn finish(self, categories: &[String], metrics: &[Metric]) -> AggregateRow {
        let values = metrics
            .iter()
            .map(|m| match m {
                Metric::PunctualityRate => MetricValue::PunctualityRate(self.punctuality_rate()),
                Metric::MeanDelay => MetricValue::MeanDelay(mean(&self.delays)),
                Metric::CauseShare => MetricValue::CauseShare(self.cause_share(categories)),
                Metric::CancelRate => MetricValue::CancelRate(ratio(
                    self.cancel_cancelled as f64,
                    self.cancel_scheduled as f64,
                )),
                Metric::Counts => MetricValue::Counts(self.counts),
            })
            .collect();

        AggregateRow {
            key: self.key,
            record_count: self.records,
            metrics: values,
        }
    }

    fn punctuality_rate(&self) -> Option<f64> {
        let scheduled = self.rate_scheduled as f64;
        let on_time = scheduled - self.rate_delayed as f64;
        ratio(on_time, scheduled).map(|r| clamp(r, 0.0, 1.0).0)
    }

    fn cause_share(&self, categories: &[String]) -> BTreeMap<String, f64> {
        let total: f64 = self.cause_delay.values().sum();
        categories
            .iter()
            .map(|cat| {
                let share = if total > 0.0 {
                    self.cause_delay.get(cat).copied().unwrap_or(0.0) / total
                } else {
                    0.0
                };
                (cat.clone(), share)
            })
            .collect()
    }
}
