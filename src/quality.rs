//! Data-quality checks over a normalized dataset.

use std::collections::HashMap;

use serde::Serialize;

use crate::schema::Field;
use crate::types::{EnrichedRecord, Period, RawRecord};

/// Several records sharing (period, service, departure, arrival).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateKey {
    pub period: Period,
    pub service: Option<String>,
    pub departure: String,
    pub arrival: String,
    pub count: usize,
}

/// A record breaking one of the logical rules between its counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyIssue {
    /// Position of the record in the dataset.
    pub index: usize,
    pub rule: &'static str,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMissing {
    pub field: &'static str,
    pub missing: usize,
    pub missing_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub records: usize,
    pub duplicate_keys: Vec<DuplicateKey>,
    pub consistency: Vec<ConsistencyIssue>,
    /// Records with at least one cause value clamped into `[0, 100]`.
    pub clamped_records: usize,
    pub missingness: Vec<FieldMissing>,
}

impl QualityReport {
    pub fn build(records: &[EnrichedRecord]) -> Self {
        let raw: Vec<&RawRecord> = records.iter().map(|r| &r.record).collect();

        QualityReport {
            records: raw.len(),
            duplicate_keys: duplicate_keys(&raw),
            consistency: raw
                .iter()
                .enumerate()
                .flat_map(|(i, r)| consistency_issues(i, r))
                .collect(),
            clamped_records: raw.iter().filter(|r| r.causes_clamped).count(),
            missingness: missingness(&raw),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.duplicate_keys.is_empty() && self.consistency.is_empty() && self.clamped_records == 0
    }
}

fn duplicate_keys(records: &[&RawRecord]) -> Vec<DuplicateKey> {
    let mut order: Vec<(Period, Option<&str>, &str, &str)> = Vec::new();
    let mut counts: HashMap<(Period, Option<&str>, &str, &str), usize> = HashMap::new();

    for r in records {
        let key = (
            r.period,
            r.service.as_deref(),
            r.route.departure.as_str(),
            r.route.arrival.as_str(),
        );
        let count = counts.entry(key).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }

    let mut dups: Vec<DuplicateKey> = order
        .into_iter()
        .filter_map(|key| {
            let count = counts[&key];
            (count > 1).then(|| DuplicateKey {
                period: key.0,
                service: key.1.map(str::to_string),
                departure: key.2.to_string(),
                arrival: key.3.to_string(),
                count,
            })
        })
        .collect();
    // stable: ties keep first-seen order
    dups.sort_by(|a, b| b.count.cmp(&a.count));
    dups
}

fn consistency_issues(index: usize, r: &RawRecord) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();
    let mut check = |rule: &'static str, lhs: Option<u64>, rhs: Option<u64>| {
        if let (Some(l), Some(r)) = (lhs, rhs) {
            if l > r {
                issues.push(ConsistencyIssue {
                    index,
                    rule,
                    details: format!("{l} > {r}"),
                });
            }
        }
    };

    let circulated = r.circulated();
    check("delayed <= circulated", r.delayed, circulated);
    check("late_over_15 <= circulated", r.late_over_15, circulated);
    check("late_over_30 <= late_over_15", r.late_over_30, r.late_over_15);
    check("late_over_60 <= late_over_30", r.late_over_60, r.late_over_30);

    if let (Some(all), Some(late)) = (r.avg_delay_all, r.avg_delay) {
        if all > late {
            issues.push(ConsistencyIssue {
                index,
                rule: "avg_delay_all <= avg_delay",
                details: format!("{all} > {late}"),
            });
        }
    }

    issues
}

fn missingness(records: &[&RawRecord]) -> Vec<FieldMissing> {
    let total = records.len();
    let mut out: Vec<FieldMissing> = Field::ALL
        .into_iter()
        .map(|field| {
            let missing = records.iter().filter(|r| is_missing(r, field)).count();
            FieldMissing {
                field: field.name(),
                missing,
                missing_pct: if total == 0 {
                    0.0
                } else {
                    missing as f64 / total as f64 * 100.0
                },
            }
        })
        .collect();
    out.sort_by(|a, b| b.missing.cmp(&a.missing));
    out
}

fn is_missing(r: &RawRecord, field: Field) -> bool {
    match field {
        Field::Period | Field::Departure | Field::Arrival => false,
        Field::Service => r.service.is_none(),
        Field::JourneyMinutes => r.journey_minutes.is_none(),
        Field::Scheduled => r.scheduled.is_none(),
        Field::Cancelled => r.cancelled.is_none(),
        Field::LateDepartures => r.late_departures.is_none(),
        Field::Delayed => r.delayed.is_none(),
        Field::AvgDelay => r.avg_delay.is_none(),
        Field::AvgDelayAll => r.avg_delay_all.is_none(),
        Field::LateOver15 => r.late_over_15.is_none(),
        Field::LateOver30 => r.late_over_30.is_none(),
        Field::LateOver60 => r.late_over_60.is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Route;

    #[test]
    fn test_duplicates_detected() {
        let records = vec![
            rec("2023-01", "A", "B"),
            rec("2023-01", "C", "D"),
            rec("2023-01", "A", "B"),
        ];
        let report = QualityReport::build(&records);
        assert_eq!(report.duplicate_keys.len(), 1);
        assert_eq!(report.duplicate_keys[0].departure, "A");
        assert_eq!(report.duplicate_keys[0].count, 2);
    }

    #[test]
    fn test_consistency_rules() {
        let mut r = rec("2023-01", "A", "B");
        r.record.scheduled = Some(100);
        r.record.cancelled = Some(10);
        r.record.delayed = Some(95);
        r.record.late_over_15 = Some(20);
        r.record.late_over_30 = Some(25);
        r.record.avg_delay = Some(10.0);
        r.record.avg_delay_all = Some(12.0);

        let report = QualityReport::build(&[r]);
        let rules: Vec<_> = report.consistency.iter().map(|i| i.rule).collect();
        assert_eq!(
            rules,
            vec![
                "delayed <= circulated",
                "late_over_30 <= late_over_15",
                "avg_delay_all <= avg_delay"
            ]
        );
        assert_eq!(report.consistency[0].details, "95 > 90");
        assert!(!report.is_clean());
    }

    #[test]
    fn test_missing_operands_skip_rules() {
        let mut r = rec("2023-01", "A", "B");
        r.record.delayed = Some(5);
        let report = QualityReport::build(&[r]);
        assert!(report.consistency.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_clamped_records_counted() {
        let mut r = rec("2023-01", "A", "B");
        r.record.causes_clamped = true;
        let report = QualityReport::build(&[r, rec("2023-02", "A", "B")]);
        assert_eq!(report.clamped_records, 1);
    }

    #[test]
    fn test_missingness() {
        let mut a = rec("2023-01", "A", "B");
        a.record.scheduled = Some(10);
        let b = rec("2023-02", "A", "B");
        let report = QualityReport::build(&[a, b]);

        let scheduled = report
            .missingness
            .iter()
            .find(|m| m.field == "scheduled")
            .unwrap();
        assert_eq!(scheduled.missing, 1);
        assert_eq!(scheduled.missing_pct, 50.0);

        let period = report.missingness.iter().find(|m| m.field == "period").unwrap();
        assert_eq!(period.missing, 0);
    }

    fn rec(period: &str, dep: &str, arr: &str) -> EnrichedRecord {
        EnrichedRecord {
            record: RawRecord::new(Period::parse(period).unwrap(), Route::new(dep, arr)),
            departure_coords: None,
            arrival_coords: None,
        }
    }
}
