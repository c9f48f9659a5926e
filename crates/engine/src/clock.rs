//! Timestamps as stored in records and shown to scripts.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// `%Y-%m-%d %H:%M:%S`, the format scripts see by default.
pub const DEFAULT_SERVER_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}

pub fn now_rfc3339() -> String {
    rfc3339(OffsetDateTime::now_utc())
}

/// Parse an RFC 3339 timestamp or a naive `%Y-%m-%d %H:%M:%S` one (taken as
/// UTC).
pub fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    if let Ok(at) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(at);
    }
    PrimitiveDateTime::parse(
        text,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_timestamp_forms_parse() {
        let a = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let b = parse_timestamp("2024-05-01 10:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(rfc3339(a), "2024-05-01T10:00:00Z");
        assert!(parse_timestamp("yesterday").is_none());
    }
}
