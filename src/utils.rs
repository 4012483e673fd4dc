use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;
use time_tz::{timezones, OffsetDateTimeExt};

/// Current wall-clock time in Europe/Rome.
pub fn rome_now() -> OffsetDateTime {
    to_rome(OffsetDateTime::now_utc())
}

/// The same instant, carrying the Europe/Rome offset in force at that moment.
pub fn to_rome(at: OffsetDateTime) -> OffsetDateTime {
    at.to_timezone(timezones::db::europe::ROME)
}

/// ISO-8601 timestamp with offset, as posted to the webhook.
pub fn iso8601(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

/// Human-readable timestamp for the system prompt, weekday included so the model can resolve
/// relative dates ("martedì prossimo").
pub fn prompt_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday], [year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
    );
    at.format(&format).unwrap_or_else(|_| iso8601(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn rome_hours(at: OffsetDateTime) -> i8 {
        to_rome(at).offset().whole_hours()
    }

    #[test]
    fn summer_and_winter_offsets() {
        assert_eq!(rome_hours(datetime!(2026-10-18 12:00 UTC)), 2);
        assert_eq!(rome_hours(datetime!(2026-12-01 12:00 UTC)), 1);
    }

    #[test]
    fn switches_exactly_at_one_utc() {
        // 2026: summer time runs from 29 March to 25 October
        assert_eq!(rome_hours(datetime!(2026-03-29 00:59 UTC)), 1);
        assert_eq!(rome_hours(datetime!(2026-03-29 01:00 UTC)), 2);
        assert_eq!(rome_hours(datetime!(2026-10-25 00:59 UTC)), 2);
        assert_eq!(rome_hours(datetime!(2026-10-25 01:00 UTC)), 1);
    }

    #[test]
    fn keeps_the_instant() {
        let at = datetime!(2026-07-01 10:00 UTC);
        assert_eq!(to_rome(at), at);
    }

    #[test]
    fn formats_with_local_offset() {
        let at = to_rome(datetime!(2026-10-20 07:30 UTC));
        assert_eq!(iso8601(at), "2026-10-20T09:30:00+02:00");
        assert_eq!(prompt_timestamp(at), "Tuesday, 2026-10-20 09:30:00 +02:00");
    }
}
