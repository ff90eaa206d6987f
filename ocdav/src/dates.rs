// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! RFC 1123 HTTP-date handling.
//!
//! Servers stamp `Date` and `getlastmodified` values like
//! `Sun, 06 Nov 1994 08:49:37 GMT`. These are always UTC, so the codec
//! here never consults the host timezone; conversion is plain day-count
//! arithmetic.

const SHORT_MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const SHORT_DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("not a valid RFC 1123 date: {0}")]
pub struct InvalidHttpDate(pub String);

/// Parses an RFC 1123 date into seconds since the Unix epoch.
///
/// # Errors
///
/// If the input does not have the `Sun, 06 Nov 1994 08:49:37 GMT` shape,
/// including the case of a month name outside the English table.
pub fn parse_http_date(date: &str) -> Result<i64, InvalidHttpDate> {
    let err = || InvalidHttpDate(date.to_string());

    let mut fields = date.split_whitespace();
    let _wkday = fields.next().ok_or_else(err)?;
    let day: u32 = fields.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let month = fields.next().ok_or_else(err)?;
    let year: i64 = fields.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let time = fields.next().ok_or_else(err)?;
    if fields.next() != Some("GMT") || fields.next().is_some() {
        return Err(err());
    }

    let month = SHORT_MONTHS
        .iter()
        .position(|m| *m == month)
        .ok_or_else(err)?;

    let mut hms = time.split(':');
    let hour: i64 = hms.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let minute: i64 = hms.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let second: i64 = hms.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    if hms.next().is_some() || !(0..24).contains(&hour) || !(0..60).contains(&minute) {
        return Err(err());
    }

    if day == 0 || day > 31 {
        return Err(err());
    }

    let days = days_from_civil(year, u32::try_from(month).expect("index below 12") + 1, day);
    Ok(days * 86_400 + hour * 3_600 + minute * 60 + second)
}

/// Formats seconds since the Unix epoch as an RFC 1123 date.
#[must_use]
pub fn format_http_date(epoch: i64) -> String {
    let days = epoch.div_euclid(86_400);
    let secs = epoch.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);

    // 1970-01-01 was a Thursday.
    let weekday = usize::try_from((days + 4).rem_euclid(7)).expect("value below 7");

    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        SHORT_DAYS[weekday],
        day,
        SHORT_MONTHS[(month - 1) as usize],
        year,
        secs / 3_600,
        (secs / 60) % 60,
        secs % 60,
    )
}

// Civil-calendar conversions from Howard Hinnant's chrono-compatible
// algorithms; both are exact over the whole i64 day range we care about.

fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let yoe = year - era * 400;
    let mp = i64::from(if month > 2 { month - 3 } else { month + 9 });
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = u32::try_from(doy - (153 * mp + 2) / 5 + 1).expect("day fits in u32");
    let month = u32::try_from(if mp < 10 { mp + 3 } else { mp - 9 }).expect("month fits in u32");
    (if month <= 2 { year + 1 } else { year }, month, day)
}

#[cfg(test)]
mod tests {
    use super::{format_http_date, parse_http_date};

    #[test]
    fn test_parse_known_instant() {
        assert_eq!(
            parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap(),
            784_111_777
        );
        assert_eq!(parse_http_date("Thu, 01 Jan 1970 00:00:00 GMT").unwrap(), 0);
    }

    #[test]
    fn test_format_known_instant() {
        assert_eq!(format_http_date(784_111_777), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(format_http_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn test_round_trip() {
        for epoch in [0, 1, 784_111_777, 951_854_402, 4_102_444_799] {
            let formatted = format_http_date(epoch);
            assert_eq!(parse_http_date(&formatted).unwrap(), epoch, "{formatted}");
        }
    }

    #[test]
    fn test_corrupt_month_is_an_error() {
        parse_http_date("Sun, 06 Nxv 1994 08:49:37 GMT").unwrap_err();
    }

    #[test]
    fn test_rejects_truncated_input() {
        parse_http_date("Sun, 06 Nov 1994").unwrap_err();
        parse_http_date("").unwrap_err();
        parse_http_date("Sun, 06 Nov 1994 08:49:37 CET").unwrap_err();
    }

    #[test]
    fn test_leap_day() {
        assert_eq!(
            parse_http_date("Tue, 29 Feb 2000 12:00:02 GMT").unwrap(),
            951_825_602
        );
    }
}
