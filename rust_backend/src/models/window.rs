//! Production window resolution.
//!
//! A production day runs from 07:00:00 to 06:59:59 on the following calendar
//! day. Every request is reduced to a [`ProductionWindow`] spanning one or
//! more production days together with the [`FilterType`] that selects the
//! utilization and cycle-time formulas downstream.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Hour at which a production day starts.
pub const PRODUCTION_DAY_START_HOUR: u32 = 7;

/// Calendar years accepted in filter input.
const FILTER_YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// Reporting period that governs the downstream formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Day,
    Week,
    Month,
    Range,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Range => "range",
        }
    }

    /// Whether cycle time is derived from reconciled active time instead of
    /// the raw first/last span.
    pub fn uses_reconciled_time(&self) -> bool {
        !matches!(self, Self::Day)
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "range" => Ok(Self::Range),
            _ => Err(format!("Unknown filter type: {}", s)),
        }
    }
}

/// Raw, user-supplied filter values. At most one of them is honoured, in the
/// priority order `day > week > month > (start_date, end_date) > start_date`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowFilter {
    pub day: Option<String>,
    pub week: Option<String>,
    pub month: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl WindowFilter {
    pub fn day(day: impl Into<String>) -> Self {
        Self {
            day: Some(day.into()),
            ..Default::default()
        }
    }

    pub fn week(week: impl Into<String>) -> Self {
        Self {
            week: Some(week.into()),
            ..Default::default()
        }
    }

    pub fn month(month: impl Into<String>) -> Self {
        Self {
            month: Some(month.into()),
            ..Default::default()
        }
    }

    pub fn range(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: Some(start_date.into()),
            end_date: Some(end_date.into()),
            ..Default::default()
        }
    }

    /// The filter type implied by which value was supplied. Blank strings
    /// count as absent.
    pub fn filter_type(&self) -> FilterType {
        if present(&self.day).is_some() {
            FilterType::Day
        } else if present(&self.week).is_some() {
            FilterType::Week
        } else if present(&self.month).is_some() {
            FilterType::Month
        } else if present(&self.start_date).is_some() && present(&self.end_date).is_some() {
            FilterType::Range
        } else {
            FilterType::Day
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Canonical `[prod_start, prod_end]` window of one request. Immutable once
/// resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub prod_start: NaiveDateTime,
    pub prod_end: NaiveDateTime,
    pub filter_type: FilterType,
}

impl ProductionWindow {
    /// Build the window covering the production days `start_date..=end_date`.
    /// A window ending on the last representable date ends at
    /// [`NaiveDateTime::MAX`].
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, filter_type: FilterType) -> Self {
        let day_start = production_day_start();
        let prod_start = start_date.and_time(day_start);
        let prod_end = end_date
            .succ_opt()
            .and_then(|next| next.and_time(day_start).checked_sub_signed(Duration::seconds(1)))
            .unwrap_or(NaiveDateTime::MAX);

        Self {
            start_date,
            end_date,
            prod_start,
            prod_end,
            filter_type,
        }
    }

    /// Single production day window.
    pub fn for_day(day: NaiveDate) -> Self {
        Self::new(day, day, FilterType::Day)
    }

    /// Whether a timestamp falls inside the window (both ends inclusive).
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.prod_start && ts <= self.prod_end
    }

    /// Header label, e.g. `2024-03-04 → 2024-03-10` or a single date.
    pub fn label(&self) -> String {
        if self.start_date == self.end_date {
            self.start_date.to_string()
        } else {
            format!("{} → {}", self.start_date, self.end_date)
        }
    }
}

fn production_day_start() -> NaiveTime {
    NaiveTime::from_hms_opt(PRODUCTION_DAY_START_HOUR, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// The civil date whose production day contains `now`. Anything before 07:00
/// still belongs to the previous date's shift.
pub fn production_day_for(now: NaiveDateTime) -> NaiveDate {
    if now.time() < production_day_start() {
        now.date().pred_opt().unwrap_or(now.date())
    } else {
        now.date()
    }
}

/// Resolve a filter into a production window.
///
/// Parse failures never propagate: a malformed day, ISO week, month or range
/// collapses to `today`, keeping the filter type implied by the input.
pub fn resolve_window(filter: &WindowFilter, today: NaiveDate) -> ProductionWindow {
    let filter_type = filter.filter_type();

    let (start, end) = if let Some(day) = present(&filter.day) {
        let d = parse_date(day).unwrap_or(today);
        (d, d)
    } else if let Some(week) = present(&filter.week) {
        parse_iso_week(week).unwrap_or((today, today))
    } else if let Some(month) = present(&filter.month) {
        parse_month(month).unwrap_or((today, today))
    } else if let (Some(start), Some(end)) = (present(&filter.start_date), present(&filter.end_date))
    {
        match (parse_date(start), parse_date(end)) {
            (Some(s), Some(e)) => (s, e),
            _ => (today, today),
        }
    } else if let Some(start) = present(&filter.start_date) {
        let d = parse_date(start).unwrap_or(today);
        (d, d)
    } else {
        (today, today)
    };

    ProductionWindow::new(start, end, filter_type)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .filter(|d| FILTER_YEARS.contains(&d.year()))
}

/// `YYYY-Www` to the Monday..=Sunday of that ISO week.
fn parse_iso_week(value: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (year, week) = value.split_once("-W")?;
    let year: i32 = year.parse().ok().filter(|y| FILTER_YEARS.contains(y))?;
    let week: u32 = week.parse().ok()?;
    let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
    let sunday = NaiveDate::from_isoywd_opt(year, week, Weekday::Sun)?;
    Some((monday, sunday))
}

/// `YYYY-MM` to the first..=last calendar day of that month.
fn parse_month(value: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (year, month) = value.split_once('-')?;
    let year: i32 = year.parse().ok().filter(|y| FILTER_YEARS.contains(y))?;
    let month: u32 = month.parse().ok()?;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}
