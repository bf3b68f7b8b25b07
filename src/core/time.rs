use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

pub(crate) fn now_utc() -> OffsetDateTime {
    // Postgres keeps microseconds; truncating here keeps stored and returned values equal.
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.microsecond() * 1_000).unwrap_or(now)
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.to_offset(UtcOffset::UTC).format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}
