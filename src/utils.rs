use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::table::TimeBasis;

/// Naive layouts tried in order when no explicit format is configured.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y"];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M%:z"];

/// Parse a float that may use comma as decimal separator.
/// Non-finite results (`NaN`, `inf`) count as missing.
pub fn parse_locale_float(s: &str) -> Option<f64> {
    s.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn is_invisible(c: char) -> bool {
    c.is_whitespace() || matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}')
}

/// Strips surrounding whitespace and invisible characters from a column label.
pub fn clean_label(label: &str) -> String {
    label.trim_matches(is_invisible).to_string()
}

/// Parse a timestamp and report how it is represented.
///
/// With `format`, only that layout is used; layouts carrying `%z` produce UTC
/// values. Without it, offset-carrying representations are tried first, then
/// the common naive layouts, then date-only layouts at midnight. A `tz`
/// localizes naive values and converts them to UTC.
pub fn parse_timestamp(
    raw: &str,
    format: Option<&str>,
    tz: Option<&Tz>,
) -> Result<(NaiveDateTime, TimeBasis), String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty timestamp".to_string());
    }

    let parsed = match format {
        Some(fmt) if fmt.contains("%z") || fmt.contains("%:z") => DateTime::parse_from_str(raw, fmt)
            .map(|dt| (dt.naive_utc(), TimeBasis::Utc))
            .map_err(|e| format!("Failed to parse timestamp '{}' with format '{}': {}", raw, fmt, e))?,
        Some(fmt) => NaiveDateTime::parse_from_str(raw, fmt)
            .or_else(|e| {
                NaiveDate::parse_from_str(raw, fmt)
                    .map(|d| d.and_time(chrono::NaiveTime::MIN))
                    .map_err(|_| e)
            })
            .map(|naive| (naive, TimeBasis::Naive))
            .map_err(|e| format!("Failed to parse timestamp '{}' with format '{}': {}", raw, fmt, e))?,
        None => guess_timestamp(raw)
            .ok_or_else(|| format!("Unrecognized timestamp '{}'", raw))?,
    };

    match (parsed, tz) {
        ((naive, TimeBasis::Naive), Some(tz)) => localize(naive, tz).map(|utc| (utc, TimeBasis::Utc)),
        (parsed, _) => Ok(parsed),
    }
}

fn guess_timestamp(raw: &str) -> Option<(NaiveDateTime, TimeBasis)> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some((dt.naive_utc(), TimeBasis::Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some((dt.naive_utc(), TimeBasis::Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some((naive, TimeBasis::Naive));
        }
    }
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .map(|d| (d.and_time(chrono::NaiveTime::MIN), TimeBasis::Naive))
    })
}

/// Interpret a wall-clock value in `tz` and convert it to UTC.
pub fn localize(naive: NaiveDateTime, tz: &Tz) -> Result<NaiveDateTime, String> {
    tz.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
        .ok_or_else(|| format!("Ambiguous or invalid local time '{}' for timezone {}", naive, tz))
}

/// Convert an Excel serial date (days since 1899-12-30) to a timestamp,
/// rounded to the millisecond.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_time(chrono::NaiveTime::MIN);
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    #[test]
    fn clean_label_strips_invisible_characters() {
        assert_eq!(clean_label("\u{feff} Puissance [kW]\u{a0}"), "Puissance [kW]");
        assert_eq!(clean_label("\u{200b}Date\t"), "Date");
        assert_eq!(clean_label("Irradiation (ALBEDO) [W/m²]"), "Irradiation (ALBEDO) [W/m²]");
    }

    #[test]
    fn locale_float_accepts_decimal_comma() {
        assert_eq!(parse_locale_float("12,5"), Some(12.5));
        assert_eq!(parse_locale_float(" -3.25 "), Some(-3.25));
        assert_eq!(parse_locale_float("NaN"), None);
        assert_eq!(parse_locale_float("n/a"), None);
    }

    #[test]
    fn guesses_naive_layouts() {
        assert_eq!(
            parse_timestamp("2024-06-01 13:00:00", None, None).unwrap(),
            (dt(2024, 6, 1, 13, 0), TimeBasis::Naive)
        );
        assert_eq!(
            parse_timestamp("01/06/2024 13:30", None, None).unwrap(),
            (dt(2024, 6, 1, 13, 30), TimeBasis::Naive)
        );
        assert_eq!(
            parse_timestamp("2024-06-01", None, None).unwrap(),
            (dt(2024, 6, 1, 0, 0), TimeBasis::Naive)
        );
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let (ts, basis) = parse_timestamp("2024-06-01T13:00:00+02:00", None, None).unwrap();
        assert_eq!(basis, TimeBasis::Utc);
        assert_eq!(ts, dt(2024, 6, 1, 11, 0));
    }

    #[test]
    fn explicit_format_is_enforced() {
        assert!(parse_timestamp("2024-06-01 13:00", Some("%d/%m/%Y %H:%M"), None).is_err());
        let (ts, _) = parse_timestamp("01/06/2024 13:00", Some("%d/%m/%Y %H:%M"), None).unwrap();
        assert_eq!(ts, dt(2024, 6, 1, 13, 0));
    }

    #[test]
    fn timezone_localizes_naive_values() {
        let tz: Tz = "Europe/Paris".parse().unwrap();
        let (ts, basis) = parse_timestamp("2024-06-01 13:00:00", None, Some(&tz)).unwrap();
        assert_eq!(basis, TimeBasis::Utc);
        assert_eq!(ts, dt(2024, 6, 1, 11, 0));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_timestamp("yesterday", None, None).is_err());
        assert!(parse_timestamp("   ", None, None).is_err());
    }

    #[test]
    fn excel_serial_conversion() {
        assert_eq!(excel_serial_to_datetime(45444.5), Some(dt(2024, 6, 1, 12, 0)));
        assert_eq!(excel_serial_to_datetime(-1.0), None);
    }
}
