use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound as _, TimeDelta, Utc};

/// Text layout used for the `time` column. Lexical order equals chronological order.
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses the timestamp layouts found in Molly Brown logs and on the command line.
///
/// Values carrying an offset are converted to UTC; values without one are taken as UTC.
pub fn parse_flexible(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

/// `clap` value parser for timestamp arguments.
pub fn parse_cli_arg(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_flexible(raw).ok_or_else(|| {
        format!("invalid timestamp `{raw}`; expected e.g. 2022-04-20 or 2022-04-20T12:06:00Z")
    })
}

pub fn to_storage(time: &DateTime<Utc>) -> String {
    time.trunc_subsecs(0).format(STORAGE_FORMAT).to_string()
}

/// Smallest whole second at or after `time`.
pub fn ceil_second(time: &DateTime<Utc>) -> DateTime<Utc> {
    let whole = time.trunc_subsecs(0);
    if whole == *time {
        whole
    } else {
        whole + TimeDelta::seconds(1)
    }
}

pub fn from_storage(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, STORAGE_FORMAT)
        .ok()
        .map(|datetime| datetime.and_utc())
}

pub fn display(time: &DateTime<Utc>) -> String {
    time.format(DISPLAY_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};

    use super::{ceil_second, display, from_storage, parse_flexible, to_storage};

    #[test]
    fn parses_rfc3339_with_zulu_and_offsets() {
        let expected = Utc.with_ymd_and_hms(2022, 4, 20, 12, 6, 0).unwrap();
        assert_eq!(parse_flexible("2022-04-20T12:06:00Z"), Some(expected));
        assert_eq!(parse_flexible("2022-04-20T14:06:00+02:00"), Some(expected));
        assert_eq!(parse_flexible("2022-04-20 14:06:00+0200"), Some(expected));
    }

    #[test]
    fn parses_go_log_layout_and_bare_dates_as_utc() {
        assert_eq!(
            parse_flexible("2022/04/20 12:06:00"),
            Some(Utc.with_ymd_and_hms(2022, 4, 20, 12, 6, 0).unwrap())
        );
        assert_eq!(
            parse_flexible("2022-04-20"),
            Some(Utc.with_ymd_and_hms(2022, 4, 20, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_flexible(""), None);
        assert_eq!(parse_flexible("yesterday"), None);
        assert_eq!(parse_flexible("2022-13-40"), None);
    }

    #[test]
    fn storage_layout_truncates_subseconds_and_round_trips() {
        let time = Utc.with_ymd_and_hms(2022, 6, 25, 12, 44, 3).unwrap()
            + chrono::Duration::milliseconds(750);
        let stored = to_storage(&time);
        assert_eq!(stored, "2022-06-25 12:44:03");
        assert_eq!(
            from_storage(&stored),
            Some(Utc.with_ymd_and_hms(2022, 6, 25, 12, 44, 3).unwrap())
        );
        assert_eq!(display(&from_storage(&stored).unwrap()), "2022-06-25 12:44:03 UTC");
    }

    #[test]
    fn ceil_second_only_moves_fractional_times() {
        let whole = Utc.with_ymd_and_hms(2022, 4, 20, 12, 0, 0).unwrap();
        assert_eq!(ceil_second(&whole), whole);
        assert_eq!(
            ceil_second(&(whole + chrono::Duration::milliseconds(1))),
            Utc.with_ymd_and_hms(2022, 4, 20, 12, 0, 1).unwrap()
        );
    }
}
