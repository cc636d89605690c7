//! Display grouping and utilization summaries.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::stats::round2;
use crate::models::OperatorMetricRecord;

/// Key of the synthetic overall-average summary entry.
pub const AVERAGE_KEY: &str = "__AVERAGE__";

/// Row ordering applied before grouping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    None,
    /// Operator id ascending.
    Az,
    /// Operator id descending.
    Za,
    /// `Start_Time` ascending, records without one last.
    Time,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "az" => Ok(Self::Az),
            "za" => Ok(Self::Za),
            "time" => Ok(Self::Time),
            _ => Err(format!("Unknown sort order: {}", s)),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Az => "az",
            Self::Za => "za",
            Self::Time => "time",
        })
    }
}

/// Stable in-place sort.
pub fn sort_records(records: &mut [OperatorMetricRecord], order: SortOrder) {
    match order {
        SortOrder::None => {}
        SortOrder::Az => records.sort_by(|a, b| a.operator_id.cmp(&b.operator_id)),
        SortOrder::Za => records.sort_by(|a, b| b.operator_id.cmp(&a.operator_id)),
        SortOrder::Time => records.sort_by(|a, b| match (a.start_time, b.start_time) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }),
    }
}

/// Run lengths for collapsed-cell display: the first row of each maximal run
/// of equal values carries the run length, the rest carry `0`.
pub fn rowspans<T: PartialEq>(values: &[T]) -> Vec<usize> {
    let mut spans = vec![0; values.len()];
    let mut run_start = 0;
    for i in 1..=values.len() {
        if i == values.len() || values[i] != values[run_start] {
            spans[run_start] = i - run_start;
            run_start = i;
        }
    }
    spans
}

/// A record with its display rowspans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedRow {
    #[serde(flatten)]
    pub record: OperatorMetricRecord,
    pub customer_rowspan: usize,
    pub model_rowspan: usize,
}

/// All records of one operator, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorGroup {
    pub operator_id: String,
    pub rows: Vec<GroupedRow>,
    /// Sum of `%UTIL` over the group's records, rounded to 2 decimals.
    pub total_util: f64,
}

/// Per-operator utilization totals plus their mean. The mean is absent when
/// there are no operators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorSummary {
    totals: Vec<(String, f64)>,
    average: Option<f64>,
}

impl OperatorSummary {
    pub fn get(&self, operator_id: &str) -> Option<f64> {
        if operator_id == AVERAGE_KEY {
            return self.average;
        }
        self.totals
            .iter()
            .find(|(op, _)| op == operator_id)
            .map(|(_, total)| *total)
    }

    /// Mean of the unrounded per-operator totals, rounded to 2 decimals.
    pub fn average(&self) -> Option<f64> {
        self.average
    }

    /// `(operator_id, total)` pairs in group order, average excluded.
    pub fn totals(&self) -> &[(String, f64)] {
        &self.totals
    }
}

impl Serialize for OperatorSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.totals.len() + usize::from(self.average.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (operator_id, total) in &self.totals {
            map.serialize_entry(operator_id, total)?;
        }
        if let Some(average) = &self.average {
            map.serialize_entry(AVERAGE_KEY, average)?;
        }
        map.end()
    }
}

/// Grouped view handed to presentation layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupedReport {
    pub groups: Vec<OperatorGroup>,
    pub summary: OperatorSummary,
}

/// Group records by operator in order of first appearance and compute the
/// utilization summary.
pub fn group_and_summarize(records: Vec<OperatorMetricRecord>) -> GroupedReport {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(String, Vec<OperatorMetricRecord>)> = Vec::new();
    for record in records {
        match index.get(&record.operator_id) {
            Some(&i) => buckets[i].1.push(record),
            None => {
                index.insert(record.operator_id.clone(), buckets.len());
                buckets.push((record.operator_id.clone(), vec![record]));
            }
        }
    }

    let mut raw_totals = Vec::with_capacity(buckets.len());
    let groups: Vec<OperatorGroup> = buckets
        .into_iter()
        .map(|(operator_id, records)| {
            let customers: Vec<&str> = records.iter().map(|r| r.customer.as_str()).collect();
            let models: Vec<&str> = records.iter().map(|r| r.model.as_str()).collect();
            let customer_spans = rowspans(&customers);
            let model_spans = rowspans(&models);
            let raw_total: f64 = records.iter().map(|r| r.util_percent).sum();
            raw_totals.push(raw_total);

            let rows = records
                .into_iter()
                .zip(customer_spans.into_iter().zip(model_spans))
                .map(|(record, (customer_rowspan, model_rowspan))| GroupedRow {
                    record,
                    customer_rowspan,
                    model_rowspan,
                })
                .collect();

            OperatorGroup {
                operator_id,
                rows,
                total_util: round2(raw_total),
            }
        })
        .collect();

    let totals: Vec<(String, f64)> = groups
        .iter()
        .map(|g| (g.operator_id.clone(), g.total_util))
        .collect();
    let average = if raw_totals.is_empty() {
        None
    } else {
        Some(round2(raw_totals.iter().sum::<f64>() / raw_totals.len() as f64))
    };

    GroupedReport {
        groups,
        summary: OperatorSummary { totals, average },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivitySource, CycleDiagnostics};
    use chrono::NaiveDate;

    fn record(op: &str, customer: &str, model: &str, util: f64, hour: Option<u32>) -> OperatorMetricRecord {
        OperatorMetricRecord {
            customer: customer.into(),
            model: model.into(),
            station: "FINAL".into(),
            operator_id: op.into(),
            output: 1,
            target_time: None,
            cycle_time: 0.0,
            start_time: hour.map(|h| {
                NaiveDate::from_ymd_opt(2024, 3, 5)
                    .unwrap()
                    .and_hms_opt(h, 0, 0)
                    .unwrap()
            }),
            end_time: None,
            util_percent: util,
            total_util: true,
            activity_source: ActivitySource::RawSpan,
            diagnostics: CycleDiagnostics::default(),
        }
    }

    #[test]
    fn test_rowspans() {
        assert_eq!(rowspans(&["A", "A", "A", "B", "B", "C"]), vec![3, 0, 0, 2, 0, 1]);
        assert_eq!(rowspans(&["A", "B", "A"]), vec![1, 1, 1]);
        assert!(rowspans::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_group_sums_util_in_first_appearance_order() {
        let report = group_and_summarize(vec![
            record("jdoe", "ACME", "ACME", 8.33, None),
            record("asmith", "ACME", "ACME", 10.0, None),
            record("jdoe", "ACME", "ACME", 16.67, None),
        ]);

        let ops: Vec<&str> = report.groups.iter().map(|g| g.operator_id.as_str()).collect();
        assert_eq!(ops, vec!["jdoe", "asmith"]);
        assert_eq!(report.groups[0].total_util, 25.0);
        assert_eq!(report.summary.get("jdoe"), Some(25.0));
        assert_eq!(report.summary.get(AVERAGE_KEY), Some(17.5));
        assert_eq!(report.groups[0].rows[0].customer_rowspan, 2);
        assert_eq!(report.groups[0].rows[1].customer_rowspan, 0);
    }

    #[test]
    fn test_empty_input() {
        let report = group_and_summarize(Vec::new());
        assert!(report.groups.is_empty());
        assert_eq!(report.summary.average(), None);
        assert_eq!(report.summary.get(AVERAGE_KEY), None);
        assert_eq!(serde_json::to_string(&report.summary).unwrap(), "{}");
    }

    #[test]
    fn test_sort_records() {
        let mut records = vec![
            record("b", "X", "X", 0.0, None),
            record("c", "X", "X", 0.0, Some(7)),
            record("a", "X", "X", 0.0, Some(9)),
        ];
        sort_records(&mut records, SortOrder::Az);
        assert_eq!(records[0].operator_id, "a");
        sort_records(&mut records, SortOrder::Za);
        assert_eq!(records[0].operator_id, "c");
        sort_records(&mut records, SortOrder::Time);
        let ops: Vec<&str> = records.iter().map(|r| r.operator_id.as_str()).collect();
        assert_eq!(ops, vec!["c", "a", "b"]);

        assert_eq!("AZ".parse::<SortOrder>().unwrap(), SortOrder::Az);
        assert!("random".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_summary_serializes_average_last() {
        let report = group_and_summarize(vec![record("jdoe", "A", "A", 25.0, None)]);
        let json = serde_json::to_string(&report.summary).unwrap();
        assert_eq!(json, r#"{"jdoe":25.0,"__AVERAGE__":25.0}"#);
    }

    #[test]
    fn test_average_uses_unrounded_totals() {
        let report = group_and_summarize(vec![
            record("a", "X", "X", 0.004, None),
            record("a", "X", "X", 0.002, None),
            record("b", "X", "X", 0.0, None),
        ]);
        // Averaging the rounded totals (0.01, 0.0) would give 0.01.
        assert_eq!(report.summary.get("a"), Some(0.01));
        assert_eq!(report.summary.average(), Some(0.0));
    }

    #[test]
    fn test_grouping_keeps_first_appearance_order_at_scale() {
        let records: Vec<OperatorMetricRecord> = (0..2000)
            .map(|i| record(&format!("op{}", i % 500), "X", "X", 1.0, None))
            .collect();
        let report = group_and_summarize(records);
        assert_eq!(report.groups.len(), 500);
        assert_eq!(report.groups[0].operator_id, "op0");
        assert_eq!(report.groups[499].operator_id, "op499");
        assert!(report.groups.iter().all(|g| g.rows.len() == 4 && g.total_util == 4.0));
    }
}
