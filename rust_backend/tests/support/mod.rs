//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use prod_metrics::db::LocalRepository;
use prod_metrics::models::{ActionType, BreakLogEvent};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// Restores variables on unwind and serializes access to process-global env
/// vars, since tests run in parallel.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

/// Insert `output` distinct serials for `operator` evenly spread over
/// `[start, start + span_minutes]`, first and last event exactly on the bounds.
pub fn seed_run(
    repo: &LocalRepository,
    database: &str,
    table: &str,
    operator: &str,
    start: NaiveDateTime,
    span_minutes: i64,
    output: usize,
) {
    let steps = output.saturating_sub(1).max(1) as i64;
    for i in 0..output {
        let offset = Duration::seconds(span_minutes * 60 * i as i64 / steps);
        repo.insert_event(
            database,
            table,
            operator,
            &format!("{}-{}-{}", table, operator, i),
            start + offset,
        );
    }
}

/// Break-log event recorded in UTC.
pub fn break_event(operator: &str, ts: NaiveDateTime, action: ActionType) -> BreakLogEvent {
    BreakLogEvent {
        operator_id: operator.to_string(),
        timestamp: FixedOffset::east_opt(0)
            .unwrap()
            .from_local_datetime(&ts)
            .unwrap(),
        action_type: action,
    }
}

/// The two-table `acme` fixture: `acme_smt1` (5 units over 1h) and
/// `acme_final` (10 units over 2h), both for `jdoe` on 2024-03-05.
pub fn acme_fixture() -> LocalRepository {
    let repo = LocalRepository::new();
    repo.add_production_table("acme", "acme_smt1");
    repo.add_production_table("acme", "acme_final");
    seed_run(&repo, "acme", "acme_smt1", "jdoe", at(2024, 3, 5, 8, 0), 60, 5);
    seed_run(&repo, "acme", "acme_final", "jdoe", at(2024, 3, 5, 10, 0), 120, 10);
    repo
}
