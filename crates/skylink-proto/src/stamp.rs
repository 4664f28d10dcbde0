use time::macros::format_description;
use time::OffsetDateTime;

/// `HH:MM:SS.mmm`, used inside telemetry snapshots and journal notes.
pub fn clock(now: OffsetDateTime) -> String {
    now.format(format_description!("[hour]:[minute]:[second].[subsecond digits:3]"))
        .unwrap_or_default()
}

/// `YYYY-MM-DD HH:MM:SS.mmm`, used on outbound envelopes.
pub fn wire(now: OffsetDateTime) -> String {
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ))
    .unwrap_or_default()
}

/// `YYYY-MM-DD`, names the daily journal file.
pub fn day(now: OffsetDateTime) -> String {
    now.format(format_description!("[year]-[month]-[day]")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats() {
        let t = datetime!(2024-03-05 07:08:09.123_456 UTC);
        assert_eq!(clock(t), "07:08:09.123");
        assert_eq!(wire(t), "2024-03-05 07:08:09.123");
        assert_eq!(day(t), "2024-03-05");
    }
}
