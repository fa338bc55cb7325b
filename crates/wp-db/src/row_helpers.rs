//! Shared helpers for timestamps and identifiers in SQL.
//!
//! Timestamps are stored as naive UTC. They are bound as text and cast on
//! the SQL side, and read back through `CAST(... AS VARCHAR)`.

use chrono::NaiveDateTime;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Render a timestamp for `CAST(? AS TIMESTAMP)`.
pub(crate) fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Parse a timestamp produced by `CAST(col AS VARCHAR)`.
pub(crate) fn parse_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
}

/// Current time as naive UTC.
pub(crate) fn now_utc() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Double-quote an identifier, escaping embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, escaping embedded quotes.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
