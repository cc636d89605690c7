//! Row types for the raw SQL issued by [`super::MySqlRepository`].

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::{Double, Nullable, Text, Timestamp};

#[derive(Debug, QueryableByName)]
pub struct NameRow {
    #[diesel(sql_type = Text)]
    pub name: String,
}

#[derive(Debug, QueryableByName)]
pub struct ColumnRow {
    #[diesel(sql_type = Text)]
    pub column_name: String,
    #[diesel(sql_type = Text)]
    pub column_type: String,
}

#[derive(Debug, QueryableByName)]
pub struct EventRow {
    #[diesel(sql_type = Text)]
    pub operator_id: String,
    #[diesel(sql_type = Text)]
    pub serial_num: String,
    #[diesel(sql_type = Timestamp)]
    pub event_time: NaiveDateTime,
}

#[derive(Debug, QueryableByName)]
pub struct TargetTimeRow {
    #[diesel(sql_type = Nullable<Double>)]
    pub process_time: Option<f64>,
}

#[derive(Debug, QueryableByName)]
pub struct BreakLogRow {
    #[diesel(sql_type = Text)]
    pub operator_id: String,
    #[diesel(sql_type = Timestamp)]
    pub event_time: NaiveDateTime,
    #[diesel(sql_type = Text)]
    pub action: String,
}
