//! Metric calculation.
//!
//! Turns a raw aggregate and its reconciled active time into an
//! [`OperatorMetricRecord`]. The filter type selects both the utilization
//! denominator and the cycle-time numerator.

use chrono::NaiveDateTime;
use qtty::time::{Hour, Hours, Seconds};

use super::reconciler::{raw_span_seconds, ReconciliationResult};
use super::stats::{average_of_shortest, calculate_durations, mode_duration, round2};
use crate::models::{
    CycleDiagnostics, FilterType, OperatorMetricRecord, RawOperatorAggregate, TableTask,
};

/// Assumed working hours of one production day.
pub const DEFAULT_SHIFT_HOURS: f64 = 12.0;

/// Label emitted for masked stations.
pub const HIDDEN_STATION: &str = "HIDDEN";

/// Number of shortest gaps averaged into the diagnostics.
const SHORTEST_CYCLES: usize = 3;

/// Utilization denominator for a filter type.
///
/// Month and range use the number of calendar days spanned by the data, not
/// by the requested window.
pub fn total_work_hours(
    filter_type: FilterType,
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    shift_hours: f64,
) -> Hours {
    let days = match filter_type {
        FilterType::Day => 1,
        FilterType::Week => 7,
        FilterType::Month | FilterType::Range => {
            (end_time.date() - start_time.date()).num_days() + 1
        }
    };
    Hours::new(shift_hours * days as f64)
}

/// `%UTIL`: raw span over the shift-hours denominator, rounded to 2
/// decimals. `0` when either timestamp is absent.
pub fn utilization(
    start_time: Option<NaiveDateTime>,
    end_time: Option<NaiveDateTime>,
    filter_type: FilterType,
    shift_hours: f64,
) -> f64 {
    let (Some(start), Some(end)) = (start_time, end_time) else {
        return 0.0;
    };

    let span: Hours = raw_span_seconds(start_time, end_time).to::<Hour>();
    let total = total_work_hours(filter_type, start, end, shift_hours);
    if total.value() <= 0.0 {
        return 0.0;
    }
    round2(span.value() / total.value() * 100.0)
}

/// Seconds per unit of output, rounded to 2 decimals. `0` for zero output or
/// a non-positive numerator.
pub fn cycle_time(
    filter_type: FilterType,
    raw_span: Seconds,
    active: Seconds,
    output: usize,
) -> f64 {
    let numerator = if filter_type.uses_reconciled_time() {
        active
    } else {
        raw_span
    };
    if output == 0 || numerator.value() <= 0.0 {
        return 0.0;
    }
    round2(numerator.value() / output as f64)
}

/// Replace stations containing `smt` (any case) with [`HIDDEN_STATION`].
pub fn mask_station(station: &str) -> String {
    if station.to_lowercase().contains("smt") {
        HIDDEN_STATION.to_string()
    } else {
        station.to_string()
    }
}

/// Assemble the output record of one operator on one table.
///
/// `target_time` must have been looked up with the unmasked station.
pub fn build_record(
    task: &TableTask,
    aggregate: &RawOperatorAggregate,
    reconciliation: &ReconciliationResult,
    target_time: Option<f64>,
    filter_type: FilterType,
    shift_hours: f64,
) -> OperatorMetricRecord {
    let (model, station) = task.model_and_station();
    let start_time = aggregate.start_time();
    let end_time = aggregate.end_time();
    let raw_span = raw_span_seconds(start_time, end_time);
    let active = reconciliation.active_seconds();

    let durations = calculate_durations(&aggregate.sorted_timestamps);

    OperatorMetricRecord {
        customer: task.database_name.to_uppercase(),
        model: model.to_uppercase(),
        station: mask_station(&station.to_uppercase()),
        operator_id: aggregate.operator_id.clone(),
        output: aggregate.output_count,
        target_time,
        cycle_time: cycle_time(filter_type, raw_span, active, aggregate.output_count),
        start_time,
        end_time,
        util_percent: utilization(start_time, end_time, filter_type, shift_hours),
        total_util: true,
        activity_source: reconciliation.activity_source(),
        diagnostics: CycleDiagnostics {
            avg_shortest_cycle: average_of_shortest(&durations, SHORTEST_CYCLES),
            mode_cycle: mode_duration(&durations),
            active_seconds: active.value(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivitySource;
    use crate::services::reconciler::FallbackReason;
    use chrono::{Duration, NaiveDate};

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn aggregate(output: usize, start: NaiveDateTime, end: NaiveDateTime) -> RawOperatorAggregate {
        RawOperatorAggregate {
            operator_id: "jdoe".into(),
            output_count: output,
            sorted_timestamps: vec![start, end],
        }
    }

    #[test]
    fn test_day_utilization() {
        assert_eq!(
            utilization(Some(at(5, 8, 0)), Some(at(5, 9, 0)), FilterType::Day, 12.0),
            8.33
        );
        assert_eq!(utilization(None, Some(at(5, 9, 0)), FilterType::Day, 12.0), 0.0);
    }

    #[test]
    fn test_week_denominator_ignores_span() {
        // 84h denominator regardless of how many days the data covers.
        assert_eq!(
            utilization(Some(at(4, 8, 0)), Some(at(4, 16, 24)), FilterType::Week, 12.0),
            10.0
        );
    }

    #[test]
    fn test_month_denominator_uses_data_days() {
        let start = at(4, 8, 0);
        let end = at(6, 8, 0);
        assert_eq!(total_work_hours(FilterType::Month, start, end, 12.0).value(), 36.0);
        assert_eq!(total_work_hours(FilterType::Range, start, start, 12.0).value(), 12.0);
        assert_eq!(utilization(Some(start), Some(end), FilterType::Range, 12.0), 133.33);
    }

    #[test]
    fn test_cycle_time_numerator_by_filter_type() {
        let span = Seconds::new(3600.0);
        let active = Seconds::new(1800.0);
        assert_eq!(cycle_time(FilterType::Day, span, active, 5), 720.0);
        assert_eq!(cycle_time(FilterType::Week, span, active, 5), 360.0);
        assert_eq!(cycle_time(FilterType::Month, span, active, 0), 0.0);
        assert_eq!(cycle_time(FilterType::Range, span, Seconds::new(0.0), 5), 0.0);
    }

    #[test]
    fn test_mask_station() {
        assert_eq!(mask_station("SMT1"), "HIDDEN");
        assert_eq!(mask_station("pre_Smt"), "HIDDEN");
        assert_eq!(mask_station("FINAL"), "FINAL");
    }

    #[test]
    fn test_build_record_masks_after_calculation() {
        let task = TableTask::new("acme", "acme_smt1");
        let agg = aggregate(5, at(5, 8, 0), at(5, 9, 0));
        let reconciliation = ReconciliationResult::raw_span(
            agg.start_time(),
            agg.end_time(),
            FallbackReason::NotRequested,
        );

        let record = build_record(&task, &agg, &reconciliation, Some(30.0), FilterType::Day, 12.0);
        assert_eq!(record.customer, "ACME");
        assert_eq!(record.model, "ACME");
        assert_eq!(record.station, "HIDDEN");
        assert_eq!(record.cycle_time, 720.0);
        assert_eq!(record.util_percent, 8.33);
        assert_eq!(record.target_time, Some(30.0));
        assert!(record.total_util);
        assert_eq!(record.activity_source, ActivitySource::RawSpan);
    }

    #[test]
    fn test_build_record_diagnostics() {
        let start = at(5, 8, 0);
        let agg = RawOperatorAggregate {
            operator_id: "jdoe".into(),
            output_count: 4,
            sorted_timestamps: vec![
                start,
                start + Duration::seconds(60),
                start + Duration::seconds(120),
                start + Duration::seconds(210),
            ],
        };
        let reconciliation =
            ReconciliationResult::raw_span(agg.start_time(), agg.end_time(), FallbackReason::NoLogEvents);
        let record = build_record(
            &TableTask::new("acme", "acme_final"),
            &agg,
            &reconciliation,
            None,
            FilterType::Week,
            12.0,
        );

        assert_eq!(record.diagnostics.avg_shortest_cycle, 70.0);
        assert_eq!(record.diagnostics.mode_cycle, 60.0);
        assert_eq!(record.diagnostics.active_seconds, 210.0);
        assert_eq!(record.cycle_time, 52.5);
    }
}
