//! `GET /payments-summary` query parsing.
//!
//! The query must hold exactly two `key=value` pairs. `from` and `to` are
//! RFC 3339 timestamps; a missing or empty value leaves that side unbounded.
//! A trailing backslash after a `to` timestamp is stripped before parsing,
//! since some clients send one. A bare backslash is still an invalid `to`.

use chrono::{DateTime, Utc};

use crate::payments::types::SummaryRange;

/// Why a summary query was refused. All map to 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("missing query")]
    Missing,
    #[error("invalid query")]
    Invalid,
    #[error("invalid 'from' timestamp format")]
    InvalidFrom,
    #[error("invalid 'to' timestamp format")]
    InvalidTo,
}

/// Parse the query string (text after `?`) into a time window.
pub fn parse_summary_query(query: Option<&str>) -> Result<SummaryRange, QueryError> {
    let query = query.ok_or(QueryError::Missing)?;

    let pairs: Vec<&str> = query.split('&').collect();
    if pairs.len() != 2 {
        return Err(QueryError::Invalid);
    }

    let mut from = "";
    let mut to = "";
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or(QueryError::Invalid)?;
        match key {
            "from" => from = value,
            "to" => to = value,
            _ => {}
        }
    }

    let from = parse_bound(from).map_err(|_| QueryError::InvalidFrom)?;
    let to = match to.strip_suffix('\\') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => to,
    };
    let to = parse_bound(to).map_err(|_| QueryError::InvalidTo)?;
    Ok(SummaryRange::new(from, to))
}

fn parse_bound(raw: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw).map(|ts| Some(ts.with_timezone(&Utc)))
}
