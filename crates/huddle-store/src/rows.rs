//! Column conversion helpers shared by the row mappers.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

use huddle_shared::UserSummary;

/// Timestamps are stored as fixed-width RFC 3339 strings in UTC, so text
/// ordering in SQL matches chronological ordering.
pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current time at storage precision, so a freshly built entity equals
/// the one read back later.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn id_at<T: From<Uuid>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map(T::from)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a `(id, display_name, avatar)` triple starting at `idx`. The profile
/// columns come from a LEFT JOIN on `users` and may be NULL.
pub(crate) fn user_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: id_at(row, idx)?,
        display_name: row.get(idx + 1)?,
        avatar: row.get(idx + 2)?,
    })
}
