//! Schema normalizer for the monthly punctuality CSV.
//!
//! Turns delimited text rows into typed [`RawRecord`]s. Rows that cannot be
//! parsed are excluded and counted rather than failing the whole load.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::schema::{Column, Field, HeaderMap};
use crate::stats::{clamp, finite};
use crate::types::{Period, RawRecord, Route};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Diagnostics of one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub total_rows: usize,
    pub rows_parsed: usize,
    pub rows_excluded: usize,
    /// Cause values pulled back into `[0, 100]`.
    pub clamped_cause_values: usize,
    pub cause_categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub records: Vec<RawRecord>,
    pub report: NormalizeReport,
}

/// Reads the dataset at `path`, picking `;` or `,` from the header line.
///
/// # Errors
///
/// [`PipelineError::FileNotFound`] when `path` does not exist, plus every error
/// of [`normalize_delimited`].
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_records(path: &Path, headers: &HeaderMap) -> Result<Normalized> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::from_io(e, path))?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
    let delimiter = sniff_delimiter(body);
    debug!(bytes = body.len(), delimiter = %(delimiter as char), "Dataset file read");
    normalize_delimited(body, delimiter, headers)
}

/// Normalizes comma-separated rows.
pub fn normalize<R: Read>(reader: R, headers: &HeaderMap) -> Result<Normalized> {
    normalize_delimited(reader, b',', headers)
}

/// Normalizes delimited rows with a header line.
///
/// # Errors
///
/// - [`PipelineError::MissingColumn`] if period, departure or arrival has no
///   column.
/// - [`PipelineError::DatasetEmpty`] if no row parses.
pub fn normalize_delimited<R: Read>(
    reader: R,
    delimiter: u8,
    headers: &HeaderMap,
) -> Result<Normalized> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let layout = RowLayout::from_headers(rdr.headers()?, headers)?;

    let mut report = NormalizeReport {
        cause_categories: layout.categories(),
        ..Default::default()
    };
    let mut records = Vec::new();

    for (idx, result) in rdr.records().enumerate() {
        report.total_rows += 1;
        // header is line 1
        let line = idx + 2;

        let row = match result {
            Ok(row) => row,
            Err(e) => {
                debug!(line, error = %e, "Row could not be decoded, excluded");
                report.rows_excluded += 1;
                continue;
            }
        };

        match layout.parse(&row) {
            Ok((record, clamped)) => {
                report.clamped_cause_values += clamped;
                records.push(record);
            }
            Err(reason) => {
                debug!(line, reason, "Row excluded");
                report.rows_excluded += 1;
            }
        }
    }

    report.rows_parsed = records.len();

    if records.is_empty() {
        return Err(PipelineError::DatasetEmpty {
            total_rows: report.total_rows,
        });
    }

    info!(
        total_rows = report.total_rows,
        rows_parsed = report.rows_parsed,
        rows_excluded = report.rows_excluded,
        clamped_cause_values = report.clamped_cause_values,
        causes = report.cause_categories.len(),
        "Normalization complete"
    );

    Ok(Normalized { records, report })
}

fn sniff_delimiter(body: &[u8]) -> u8 {
    let header_end = body.iter().position(|&b| b == b'\n').unwrap_or(body.len());
    if body[..header_end].contains(&b';') {
        b';'
    } else {
        b','
    }
}

/// Column positions resolved once from the header row.
struct RowLayout {
    fields: HashMap<Field, usize>,
    causes: Vec<(usize, String)>,
}

impl RowLayout {
    fn from_headers(row: &StringRecord, headers: &HeaderMap) -> Result<Self> {
        let mut fields = HashMap::new();
        let mut causes = Vec::new();

        for (idx, header) in row.iter().enumerate() {
            match headers.resolve(header) {
                Column::Field(field) => {
                    // first column wins when two variants are present
                    fields.entry(field).or_insert(idx);
                }
                Column::Cause(name) => causes.push((idx, name)),
                Column::Ignored => debug!(header, "Ignoring column"),
            }
        }

        for field in Field::REQUIRED {
            if !fields.contains_key(&field) {
                return Err(PipelineError::MissingColumn(field.name()));
            }
        }

        Ok(RowLayout { fields, causes })
    }

    fn categories(&self) -> Vec<String> {
        self.causes
            .iter()
            .map(|(_, name)| name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn text<'r>(&self, row: &'r StringRecord, field: Field) -> Option<&'r str> {
        let idx = *self.fields.get(&field)?;
        row.get(idx).map(str::trim).filter(|s| !s.is_empty())
    }

    fn number(&self, row: &StringRecord, field: Field) -> Option<f64> {
        parse_number(self.text(row, field))
    }

    fn count(&self, row: &StringRecord, field: Field) -> Option<u64> {
        parse_count(self.text(row, field))
    }

    /// Returns the record and the number of clamped cause values, or the
    /// reason the row is excluded.
    fn parse(&self, row: &StringRecord) -> std::result::Result<(RawRecord, usize), &'static str> {
        let period = self
            .text(row, Field::Period)
            .and_then(Period::parse)
            .ok_or("unparseable period")?;
        let departure = self.text(row, Field::Departure).ok_or("missing departure")?;
        let arrival = self.text(row, Field::Arrival).ok_or("missing arrival")?;

        let mut record = RawRecord::new(period, Route::new(departure, arrival));
        record.service = self.text(row, Field::Service).map(str::to_string);

        record.scheduled = self.count(row, Field::Scheduled);
        record.cancelled = self.count(row, Field::Cancelled);
        record.delayed = self.count(row, Field::Delayed);
        record.late_departures = self.count(row, Field::LateDepartures);
        record.late_over_15 = self.count(row, Field::LateOver15);
        record.late_over_30 = self.count(row, Field::LateOver30);
        record.late_over_60 = self.count(row, Field::LateOver60);

        record.avg_delay = self.number(row, Field::AvgDelay);
        record.avg_delay_all = self.number(row, Field::AvgDelayAll);
        record.journey_minutes = self.number(row, Field::JourneyMinutes);

        let mut clamped = 0;
        let mut causes: BTreeMap<String, Option<f64>> = BTreeMap::new();
        for (idx, name) in &self.causes {
            let value = parse_number(row.get(*idx)).map(|v| {
                let (v, moved) = clamp(v, 0.0, 100.0);
                if moved {
                    clamped += 1;
                }
                v
            });
            let slot = causes.entry(name.clone()).or_insert(None);
            if slot.is_none() {
                *slot = value;
            }
        }
        record.causes = causes;
        record.causes_clamped = clamped > 0;

        Ok((record, clamped))
    }
}

/// Empty or non-numeric text is missing, never zero.
fn parse_number(raw: Option<&str>) -> Option<f64> {
    let s = raw?.trim();
    if s.is_empty() {
        return None;
    }
    let value = s
        .parse::<f64>()
        .or_else(|_| s.replace(',', ".").parse::<f64>())
        .ok()?;
    finite(value)
}

fn parse_count(raw: Option<&str>) -> Option<u64> {
    let value = parse_number(raw)?;
    if value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return None;
    }
    Some(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(csv: &str) -> Result<Normalized> {
        normalize(csv.as_bytes(), &HeaderMap::default())
    }

    #[test]
    fn test_normalize_basic_rows() {
        let out = run("period,dep,arr,scheduled,delayed\n\
                       2023-01,Paris,Lyon,100,10\n\
                       2023-01,Paris,Lyon,50,50\n")
        .unwrap();

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.report.total_rows, 2);
        assert_eq!(out.report.rows_excluded, 0);
        let first = &out.records[0];
        assert_eq!(first.period, Period::new(2023, 1).unwrap());
        assert_eq!(first.route, Route::new("Paris", "Lyon"));
        assert_eq!(first.scheduled, Some(100));
        assert_eq!(first.delayed, Some(10));
        assert_eq!(first.cancelled, None);
    }

    #[test]
    fn test_unparseable_period_is_excluded_and_counted() {
        let out = run("period,dep,arr,scheduled,delayed\n\
                       2023-01,Paris,Lyon,100,10\n\
                       not-a-date,Paris,Lyon,50,5\n")
        .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.report.rows_excluded, 1);
        assert_eq!(
            out.report.rows_parsed + out.report.rows_excluded,
            out.report.total_rows
        );
    }

    #[test]
    fn test_empty_station_is_excluded() {
        let out = run("period,dep,arr\n2023-01,,Lyon\n2023-02,Paris,Lyon\n").unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.report.rows_excluded, 1);
    }

    #[test]
    fn test_missing_and_zero_are_distinct() {
        let out = run("period,dep,arr,scheduled,delayed,avg_delay\n\
                       2023-01,A,B,0,,n/a\n")
        .unwrap();
        let rec = &out.records[0];
        assert_eq!(rec.scheduled, Some(0));
        assert_eq!(rec.delayed, None);
        assert_eq!(rec.avg_delay, None);
    }

    #[test]
    fn test_negative_or_fractional_counts_are_missing() {
        let out = run("period,dep,arr,scheduled,delayed\n2023-01,A,B,-4,2.5\n").unwrap();
        assert_eq!(out.records[0].scheduled, None);
        assert_eq!(out.records[0].delayed, None);
    }

    #[test]
    fn test_decimal_comma() {
        let out = normalize_delimited(
            "Date;Gare de départ;Gare d'arrivée;Retard moyen des trains en retard à l'arrivée\n\
             2021-03;PARIS LYON;LYON PART DIEU;12,5\n"
                .as_bytes(),
            b';',
            &HeaderMap::default(),
        )
        .unwrap();
        assert_eq!(out.records[0].avg_delay, Some(12.5));
    }

    #[test]
    fn test_cause_columns_collected_and_clamped() {
        let out = run("period,dep,arr,Prct retard pour causes externes,pct_cause_infra,cause_weather\n\
                       2023-01,A,B,30,120,\n\
                       2023-02,A,B,-5,40,60\n")
        .unwrap();

        assert_eq!(
            out.report.cause_categories,
            vec!["external", "infrastructure", "weather"]
        );

        let first = &out.records[0];
        assert_eq!(first.causes["external"], Some(30.0));
        assert_eq!(first.causes["infrastructure"], Some(100.0));
        assert_eq!(first.causes["weather"], None);
        assert!(first.causes_clamped);

        let second = &out.records[1];
        assert_eq!(second.causes["external"], Some(0.0));
        assert_eq!(out.report.clamped_cause_values, 2);
    }

    #[test]
    fn test_missing_required_column() {
        let result = run("period,dep,scheduled\n2023-01,A,3\n");
        assert!(matches!(
            result,
            Err(PipelineError::MissingColumn("arrival"))
        ));
    }

    #[test]
    fn test_zero_parsed_rows_is_dataset_empty() {
        let result = run("period,dep,arr\nbad,A,B\n");
        assert!(matches!(
            result,
            Err(PipelineError::DatasetEmpty { total_rows: 1 })
        ));
    }

    #[test]
    fn test_short_rows_tolerated() {
        let out = run("period,dep,arr,scheduled\n2023-01,A,B\n").unwrap();
        assert_eq!(out.records[0].scheduled, None);
    }

    #[test]
    fn test_extra_columns_ignored() {
        let out = run("period,dep,arr,Commentaire annulations\n2023-01,A,B,grève\n").unwrap();
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter(b"Date;Service\n2023-01;National"), b';');
        assert_eq!(sniff_delimiter(b"period,dep\n2023-01,a;b"), b',');
    }

    #[test]
    fn test_load_records_missing_file() {
        let result = load_records(Path::new("/definitely/not/here.csv"), &HeaderMap::default());
        assert!(matches!(result, Err(PipelineError::FileNotFound(_))));
    }
}
