//! Conversion between UTC wall-clock time and detector ticks.
//!
//! A tick is 0.1 ns. Tick zero is 00:00:00 UTC on January 1 of the
//! observing year, and ticks include every leap second inserted since then.
//! All of the year-origin handling lives in [`TickClock`]; callers never
//! compute the origin themselves.

use crate::error::{Error, Result};
use crate::leapsec::LeapSeconds;
use std::fmt;
use std::sync::Mutex;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Detector time in units of 0.1 ns since January 1 of the observing year.
pub type Tick = i64;

/// Ticks in one second.
pub const TICKS_PER_SECOND: i64 = 10_000_000_000;

/// Ticks in one microsecond.
pub const TICKS_PER_MICROSECOND: i64 = 10_000;

/// Ticks in one nanosecond.
pub const TICKS_PER_NANOSECOND: i64 = 10;

/// Convert whole seconds to ticks.
pub const fn seconds_to_ticks(seconds: i64) -> Tick {
    seconds * TICKS_PER_SECOND
}

/// A UTC timestamp carrying the detector's sub-nanosecond remainder.
///
/// `OffsetDateTime` stops at nanoseconds, one digit short of a tick, so the
/// extra tenth of a nanosecond rides alongside to keep conversions exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UtcTime {
    datetime: OffsetDateTime,
    tenths: u8,
}

impl UtcTime {
    /// Wrap a UTC date-time with no sub-nanosecond part.
    pub fn new(datetime: OffsetDateTime) -> Self {
        Self {
            datetime: datetime.to_offset(UtcOffset::UTC),
            tenths: 0,
        }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }

    /// The date-time at nanosecond resolution.
    pub fn datetime(&self) -> OffsetDateTime {
        self.datetime
    }

    /// Tenths of a nanosecond beyond [`UtcTime::datetime`].
    pub fn tenths_of_nanosecond(&self) -> u8 {
        self.tenths
    }

    /// `YYYYMMDD_HHMMSS`, the tag used in staging and archive names.
    pub fn timetag(&self) -> String {
        let dt = self.datetime;
        format!(
            "{:04}{:02}{:02}_{:02}{:02}{:02}",
            dt.year(),
            dt.month() as u8,
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        )
    }
}

impl From<OffsetDateTime> for UtcTime {
    fn from(datetime: OffsetDateTime) -> Self {
        Self::new(datetime)
    }
}

/// Formats as `YYYY-MM-DD HH:MM:SS.ffffff`.
impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dt = self.datetime;
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            dt.year(),
            dt.month() as u8,
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.microsecond()
        )
    }
}

#[derive(Clone, Copy, Debug)]
struct YearOrigin {
    year: i32,
    jan1: OffsetDateTime,
}

/// Converts between UTC and ticks for one observing year.
///
/// The January 1 origin is cached and recomputed when the year rolls over.
/// A clock built with [`TickClock::with_year`] stays pinned to that year.
#[derive(Debug)]
pub struct TickClock {
    leap: LeapSeconds,
    fixed_year: Option<i32>,
    origin: Mutex<Option<YearOrigin>>,
}

impl TickClock {
    /// A clock that follows the current calendar year.
    pub fn new(leap: LeapSeconds) -> Self {
        Self {
            leap,
            fixed_year: None,
            origin: Mutex::new(None),
        }
    }

    /// A clock pinned to `year`.
    pub fn with_year(leap: LeapSeconds, year: i32) -> Self {
        Self {
            leap,
            fixed_year: Some(year),
            origin: Mutex::new(None),
        }
    }

    /// The observing year this clock currently converts against.
    pub fn year(&self) -> i32 {
        self.fixed_year
            .unwrap_or_else(|| OffsetDateTime::now_utc().year())
    }

    fn origin(&self) -> Result<YearOrigin> {
        let year = self.year();
        let mut cached = self.origin.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(origin) = *cached
            && origin.year == year
        {
            return Ok(origin);
        }

        let jan1 = Date::from_calendar_date(year, Month::January, 1)
            .map_err(|e| Error::BadTime(format!("no January 1 in year {year}: {e}")))?
            .midnight()
            .assume_utc();
        let origin = YearOrigin { year, jan1 };
        if cached.is_some() {
            tracing::debug!(year, "observing year rolled over, tick origin recomputed");
        }
        *cached = Some(origin);
        Ok(origin)
    }

    /// Leap seconds between January 1 and the start of `day`.
    fn extra_seconds(&self, origin: &YearOrigin, day: Date) -> i64 {
        let jan1_offset = self
            .leap
            .offset(origin.year, origin.jan1.date().ordinal());
        let day_offset = self.leap.offset(day.year(), day.ordinal());
        i64::from(day_offset - jan1_offset)
    }

    /// Convert a UTC time to ticks since January 1 of the observing year.
    ///
    /// `ticks = ((days * 86400 + seconds + extra_seconds) * 10^6 + micros) * 10^4`,
    /// plus any sub-microsecond remainder carried by `utc`.
    pub fn utc_to_ticks(&self, utc: &UtcTime) -> Result<Tick> {
        let origin = self.origin()?;
        let delta = utc.datetime - origin.jan1;
        let extra = self.extra_seconds(&origin, utc.datetime.date());

        let whole_seconds = delta.whole_seconds();
        let nanos = i64::from(delta.subsec_nanoseconds());
        let micros = nanos.div_euclid(1_000);
        let sub_micro = nanos.rem_euclid(1_000) * TICKS_PER_NANOSECOND + i64::from(utc.tenths);

        (whole_seconds + extra)
            .checked_mul(1_000_000)
            .and_then(|us| us.checked_add(micros))
            .and_then(|us| us.checked_mul(TICKS_PER_MICROSECOND))
            .and_then(|t| t.checked_add(sub_micro))
            .ok_or_else(|| Error::BadTime(format!("{utc} is out of tick range")))
    }

    /// Convert ticks since January 1 of the observing year to UTC.
    pub fn ticks_to_utc(&self, tick: Tick) -> Result<UtcTime> {
        let origin = self.origin()?;
        let seconds = tick.div_euclid(TICKS_PER_SECOND);
        let remainder = tick.rem_euclid(TICKS_PER_SECOND);
        let nanos = remainder / TICKS_PER_NANOSECOND;
        let tenths = (remainder % TICKS_PER_NANOSECOND) as u8;

        let provisional = origin
            .jan1
            .checked_add(Duration::seconds(seconds))
            .and_then(|dt| dt.checked_add(Duration::nanoseconds(nanos)))
            .ok_or_else(|| Error::BadTime(format!("tick {tick} is out of range")))?;

        // The leap-second count depends on the day, which itself shifts by
        // the leap seconds, so settle on the day after one correction.
        let first = self.extra_seconds(&origin, provisional.date());
        let extra = self.extra_seconds(&origin, (provisional - Duration::seconds(first)).date());

        Ok(UtcTime {
            datetime: provisional - Duration::seconds(extra),
            tenths,
        })
    }

    /// Parse either a decimal tick count or a `YYYY-MM-DD HH:MM:SS[.ffffff]`
    /// UTC string into ticks.
    ///
    /// Fractional digits beyond microseconds are truncated. Shorter forms
    /// (`YYYY-MM-DD HH:MM` and `YYYY-MM-DD`) are accepted as well.
    pub fn string_to_ticks(&self, input: &str) -> Result<Tick> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::BadTime("empty time string".to_string()));
        }

        let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
        if digits.chars().all(|c| c.is_ascii_digit()) {
            return trimmed
                .parse::<Tick>()
                .map_err(|e| Error::BadTime(format!("{trimmed:?}: {e}")));
        }

        let utc = parse_utc(trimmed)?;
        self.utc_to_ticks(&utc)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(LeapSeconds::builtin())
    }
}

/// Parse `YYYY-MM-DD[ HH:MM[:SS[.ffffff]]]` as UTC.
pub fn parse_utc(input: &str) -> Result<UtcTime> {
    let bad = |why: &str| Error::BadTime(format!("{input:?}: {why}"));

    let (base, fraction) = match input.split_once('.') {
        Some((base, fraction)) => (base, Some(fraction)),
        None => (input, None),
    };
    let (date_part, time_part) = match base.split_once([' ', 'T']) {
        Some((d, t)) => (d, Some(t.trim())),
        None => (base, None),
    };

    let date_format = format_description!("[year]-[month]-[day]");
    let date = Date::parse(date_part, &date_format).map_err(|e| bad(&e.to_string()))?;

    let fields: Vec<u8> = match time_part {
        None => Vec::new(),
        Some(t) => t
            .split(':')
            .map(|field| field.parse::<u8>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| bad(&e.to_string()))?,
    };
    let (hour, minute, second) = match fields.as_slice() {
        [] => (0, 0, 0),
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(bad("expected HH:MM or HH:MM:SS")),
    };
    if fraction.is_some() && fields.len() != 3 {
        return Err(bad("fractional seconds need a full HH:MM:SS"));
    }

    let micros = match fraction {
        None => 0,
        Some(f) => {
            if f.is_empty() || !f.chars().all(|c| c.is_ascii_digit()) {
                return Err(bad("fractional seconds must be digits"));
            }
            let truncated: String = f.chars().take(6).collect();
            let scale = 10u32.pow(6 - truncated.len() as u32);
            truncated.parse::<u32>().map_err(|e| bad(&e.to_string()))? * scale
        }
    };

    let clock =
        Time::from_hms_micro(hour, minute, second, micros).map_err(|e| bad(&e.to_string()))?;
    Ok(UtcTime::new(PrimitiveDateTime::new(date, clock).assume_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn clock(year: i32) -> TickClock {
        TickClock::with_year(LeapSeconds::builtin(), year)
    }

    #[test]
    fn jan1_is_tick_zero() {
        let c = clock(2026);
        let utc = UtcTime::new(datetime!(2026-01-01 0:00 UTC));
        assert_eq!(c.utc_to_ticks(&utc).unwrap(), 0);
    }

    #[test]
    fn canonical_formula_matches() {
        let c = clock(2026);
        let utc = UtcTime::new(datetime!(2026-03-02 01:02:03.000004 UTC));
        let days = 31 + 28 + 1;
        let expected = ((days * 86400 + 3600 + 120 + 3) * 1_000_000 + 4) * 10_000;
        assert_eq!(c.utc_to_ticks(&utc).unwrap(), expected);
    }

    #[test]
    fn leap_second_is_added_after_insertion() {
        let c = clock(2015);
        let before = UtcTime::new(datetime!(2015-06-30 12:00 UTC));
        let after = UtcTime::new(datetime!(2015-07-01 12:00 UTC));
        let before_ticks = c.utc_to_ticks(&before).unwrap();
        let after_ticks = c.utc_to_ticks(&after).unwrap();
        assert_eq!(after_ticks - before_ticks, seconds_to_ticks(86_401));
    }

    #[test]
    fn ticks_to_utc_undoes_leap_second() {
        let c = clock(2015);
        let after = UtcTime::new(datetime!(2015-07-01 12:00 UTC));
        let ticks = c.utc_to_ticks(&after).unwrap();
        assert_eq!(c.ticks_to_utc(ticks).unwrap(), after);
    }

    #[test]
    fn round_trip_keeps_every_tick() {
        let c = clock(2026);
        for t in [0, 1, 9, 157_890_067_960_246_236, 315_359_999_999_999_999] {
            let utc = c.ticks_to_utc(t).unwrap();
            assert_eq!(c.utc_to_ticks(&utc).unwrap(), t, "tick {t}");
        }
    }

    #[test]
    fn string_to_ticks_accepts_integers() {
        let c = clock(2026);
        assert_eq!(c.string_to_ticks("12345").unwrap(), 12345);
        assert_eq!(c.string_to_ticks(" -10 ").unwrap(), -10);
    }

    #[test]
    fn string_to_ticks_truncates_sub_microseconds() {
        let c = clock(2026);
        let full = c.string_to_ticks("2026-01-01 00:00:01.123456789").unwrap();
        assert_eq!(full, seconds_to_ticks(1) + 123_456 * TICKS_PER_MICROSECOND);
        let short = c.string_to_ticks("2026-01-01 00:00:01.5").unwrap();
        assert_eq!(short, seconds_to_ticks(1) + 500_000 * TICKS_PER_MICROSECOND);
    }

    #[test]
    fn string_to_ticks_accepts_truncated_forms() {
        let c = clock(2026);
        assert_eq!(
            c.string_to_ticks("2026-01-02").unwrap(),
            seconds_to_ticks(86_400)
        );
        assert_eq!(
            c.string_to_ticks("2026-01-01 01:00").unwrap(),
            seconds_to_ticks(3_600)
        );
    }

    #[test]
    fn string_to_ticks_rejects_garbage() {
        let c = clock(2026);
        for bad in ["", "yesterday", "2026-13-01 00:00:00", "2026-01-01 00:00:00.x"] {
            assert!(
                matches!(c.string_to_ticks(bad), Err(Error::BadTime(_))),
                "{bad:?} should fail"
            );
        }
    }

    #[test]
    fn timetag_and_display() {
        let utc = UtcTime::new(datetime!(2026-07-02 03:04:05.678901 UTC));
        assert_eq!(utc.timetag(), "20260702_030405");
        assert_eq!(utc.to_string(), "2026-07-02 03:04:05.678901");
    }

    #[test]
    fn origin_follows_fixed_year() {
        let c = clock(2024);
        let utc = c.ticks_to_utc(seconds_to_ticks(86_400 * 59)).unwrap();
        assert_eq!(utc.datetime().date(), date!(2024 - 02 - 29));
    }
}
