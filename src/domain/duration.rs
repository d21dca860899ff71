use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Parses a wall-clock `YYYY-MM-DD` + `HH:MM[:SS]` pair without attaching a
/// time zone, so the same inputs always yield the same instant.
pub fn parse_instant(date: &str, time: &str) -> Result<NaiveDateTime, String> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| format!("date must be YYYY-MM-DD: {date}"))?;
    let time = time.trim();
    let time = NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .map_err(|_| format!("time must be HH:MM: {time}"))?;
    Ok(date.and_time(time))
}

/// Whole minutes from `start` to `end`, floored. Zero when `end <= start`.
pub fn elapsed_minutes(start: NaiveDateTime, end: NaiveDateTime) -> u32 {
    let millis = (end - start).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    u32::try_from(millis / 60_000).unwrap_or(u32::MAX)
}

pub fn overtime_minutes(
    start_date: &str,
    start_time: &str,
    end_date: &str,
    end_time: &str,
) -> Result<u32, String> {
    let start = parse_instant(start_date, start_time)?;
    let end = parse_instant(end_date, end_time)?;
    Ok(elapsed_minutes(start, end))
}
