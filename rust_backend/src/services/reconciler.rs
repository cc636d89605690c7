//! Activity reconciliation.
//!
//! Merges an operator's raw production timestamps with the break log into a
//! single active-working-time figure. The outcome is always a
//! [`ReconciliationResult`]: either time derived from replayed break-log
//! sessions, or the raw first/last span together with the reason the log
//! could not be used.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use log::{debug, warn};
use qtty::time::Seconds;

use crate::models::{ActionType, ActivitySource, BreakLogEvent, WorkSession};

/// Default buffer around the raw span when selecting break-log events.
pub const DEFAULT_BUFFER_MINUTES: i64 = 30;

/// Largest accepted buffer: one day on either side of the raw span.
pub const MAX_BUFFER_MINUTES: i64 = 24 * 60;

/// Why the raw span was used instead of the break log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The operator has no break-log events at all.
    NoLogEvents,
    /// None of the operator's events fall inside the buffered span.
    NoEventsInBuffer,
    /// The events could not be replayed.
    ReplayFailed(String),
    /// The filter type does not use reconciled time.
    NotRequested,
}

/// Active working time of one operator on one table.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationResult {
    ActiveTimeFromLog {
        active_seconds: Seconds,
        sessions: Vec<WorkSession>,
    },
    ActiveTimeFromRawSpan {
        active_seconds: Seconds,
        reason: FallbackReason,
    },
}

impl ReconciliationResult {
    pub fn active_seconds(&self) -> Seconds {
        match self {
            Self::ActiveTimeFromLog { active_seconds, .. }
            | Self::ActiveTimeFromRawSpan { active_seconds, .. } => *active_seconds,
        }
    }

    pub fn activity_source(&self) -> ActivitySource {
        match self {
            Self::ActiveTimeFromLog { .. } => ActivitySource::BreakLog,
            Self::ActiveTimeFromRawSpan { .. } => ActivitySource::RawSpan,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::ActiveTimeFromRawSpan { .. })
    }

    /// Raw first/last span as the active time.
    pub fn raw_span(
        start_time: Option<NaiveDateTime>,
        end_time: Option<NaiveDateTime>,
        reason: FallbackReason,
    ) -> Self {
        Self::ActiveTimeFromRawSpan {
            active_seconds: raw_span_seconds(start_time, end_time),
            reason,
        }
    }
}

/// `end_time - start_time` in seconds, `0` when either is absent.
pub fn raw_span_seconds(
    start_time: Option<NaiveDateTime>,
    end_time: Option<NaiveDateTime>,
) -> Seconds {
    match (start_time, end_time) {
        (Some(start), Some(end)) => seconds_between(start, end),
        _ => Seconds::new(0.0),
    }
}

fn seconds_between(start: NaiveDateTime, end: NaiveDateTime) -> Seconds {
    Seconds::new((end - start).num_milliseconds() as f64 / 1000.0)
}

#[derive(Debug, thiserror::Error, PartialEq)]
enum ReplayError {
    #[error("break log out of order: {current} follows {previous}")]
    OutOfOrder {
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },
}

/// Break-log replay settings.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    buffer: Duration,
    plant_offset: FixedOffset,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_MINUTES, Utc.fix())
    }
}

impl Reconciler {
    /// `buffer_minutes` widens the raw span on both sides and is clamped to
    /// `0..=MAX_BUFFER_MINUTES`; `plant_offset` is the offset production
    /// timestamps are recorded in.
    pub fn new(buffer_minutes: i64, plant_offset: FixedOffset) -> Self {
        let minutes = buffer_minutes.clamp(0, MAX_BUFFER_MINUTES);
        Self {
            buffer: Duration::try_minutes(minutes).unwrap_or_else(Duration::zero),
            plant_offset,
        }
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    pub fn plant_offset(&self) -> FixedOffset {
        self.plant_offset
    }

    /// `[start - buffer, end + buffer]` in plant-local time, saturating at the
    /// ends of the calendar.
    pub fn buffered_span(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> (NaiveDateTime, NaiveDateTime) {
        (
            start.checked_sub_signed(self.buffer).unwrap_or(start),
            end.checked_add_signed(self.buffer).unwrap_or(end),
        )
    }

    /// The instant a plant-local wall-clock time denotes.
    pub fn plant_instant(&self, ts: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        self.plant_offset.from_local_datetime(&ts).single()
    }

    /// Reconcile one operator's raw span against their break-log events.
    ///
    /// `events` must already be restricted to the operator and ordered by
    /// timestamp. Never fails: a replay error degrades to the raw span.
    pub fn reconcile(
        &self,
        operator_id: &str,
        start_time: Option<NaiveDateTime>,
        end_time: Option<NaiveDateTime>,
        events: &[BreakLogEvent],
    ) -> ReconciliationResult {
        let (Some(start), Some(end)) = (start_time, end_time) else {
            return ReconciliationResult::raw_span(start_time, end_time, FallbackReason::NoLogEvents);
        };
        if events.is_empty() {
            return ReconciliationResult::raw_span(start_time, end_time, FallbackReason::NoLogEvents);
        }

        let (from, to) = self.buffered_span(start, end);
        let buffered: Vec<(NaiveDateTime, ActionType)> = events
            .iter()
            .map(|e| {
                (
                    e.timestamp.with_timezone(&self.plant_offset).naive_local(),
                    e.action_type,
                )
            })
            .filter(|(ts, _)| *ts >= from && *ts <= to)
            .collect();

        if buffered.is_empty() {
            return ReconciliationResult::raw_span(
                start_time,
                end_time,
                FallbackReason::NoEventsInBuffer,
            );
        }

        match replay(&buffered, end) {
            Ok(sessions) => {
                let active_seconds = sessions
                    .iter()
                    .fold(Seconds::new(0.0), |acc, s| acc + s.duration);
                debug!(
                    "{}: {} session(s) from break log, {:.0}s active",
                    operator_id,
                    sessions.len(),
                    active_seconds.value()
                );
                ReconciliationResult::ActiveTimeFromLog {
                    active_seconds,
                    sessions,
                }
            }
            Err(e) => {
                warn!("{}: falling back to raw span: {}", operator_id, e);
                ReconciliationResult::raw_span(
                    start_time,
                    end_time,
                    FallbackReason::ReplayFailed(e.to_string()),
                )
            }
        }
    }
}

/// Replay `(timestamp, action)` pairs through the idle/active machine.
fn replay(
    events: &[(NaiveDateTime, ActionType)],
    end_time: NaiveDateTime,
) -> Result<Vec<WorkSession>, ReplayError> {
    let mut sessions = Vec::new();
    let mut pending: Option<NaiveDateTime> = None;
    let mut previous: Option<NaiveDateTime> = None;

    for &(ts, action) in events {
        if let Some(prev) = previous {
            if ts < prev {
                return Err(ReplayError::OutOfOrder {
                    previous: prev,
                    current: ts,
                });
            }
        }
        previous = Some(ts);

        match (action, pending) {
            (ActionType::Start, None) => pending = Some(ts),
            (ActionType::Stop, Some(start)) => {
                sessions.push(WorkSession {
                    start,
                    stop: ts,
                    duration: seconds_between(start, ts),
                });
                pending = None;
            }
            // Start while active, stop while idle, unknown actions.
            _ => {}
        }
    }

    if let Some(start) = pending {
        let duration = seconds_between(start, end_time);
        sessions.push(WorkSession {
            start,
            stop: end_time,
            duration: if duration.value() > 0.0 {
                duration
            } else {
                Seconds::new(0.0)
            },
        });
    }

    Ok(sessions)
}
