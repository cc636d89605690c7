//! Table scanning.
//!
//! One batched query per table; rows are grouped by operator in memory.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDateTime;

use crate::db::repository::{RepositoryResult, SourceConnection};
use crate::models::{ProductionWindow, RawEvent, RawOperatorAggregate, TableTask};

#[derive(Default)]
struct OperatorAccumulator<'a> {
    serials: HashSet<&'a str>,
    timestamps: BTreeSet<NaiveDateTime>,
}

/// Group raw events by operator. Operators come out sorted by id; events
/// outside the window are ignored.
pub fn aggregate_events(
    events: &[RawEvent],
    window: &ProductionWindow,
) -> Vec<RawOperatorAggregate> {
    let mut by_operator: BTreeMap<&str, OperatorAccumulator<'_>> = BTreeMap::new();

    for event in events.iter().filter(|e| window.contains(e.timestamp)) {
        let acc = by_operator.entry(event.operator_id.as_str()).or_default();
        acc.serials.insert(event.serial_num.as_str());
        acc.timestamps.insert(event.timestamp);
    }

    by_operator
        .into_iter()
        .map(|(operator_id, acc)| RawOperatorAggregate {
            operator_id: operator_id.to_string(),
            output_count: acc.serials.len(),
            sorted_timestamps: acc.timestamps.into_iter().collect(),
        })
        .collect()
}

/// Fetch a table's `status = 1` rows inside the window and aggregate them.
/// Any source error abandons the whole table.
pub fn scan_table(
    conn: &mut dyn SourceConnection,
    task: &TableTask,
    date_column: &str,
    window: &ProductionWindow,
) -> RepositoryResult<Vec<RawOperatorAggregate>> {
    let events = conn.fetch_events(task, date_column, window)?;
    Ok(aggregate_events(&events, window))
}
