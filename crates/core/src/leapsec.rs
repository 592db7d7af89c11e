//! Leap-second table.
//!
//! Detector ticks count real elapsed time, so converting a UTC wall-clock
//! time into ticks must add every leap second inserted between January 1 and
//! that time. Only the table lookup lives here; reading an external
//! leap-second file is left to operators who need a newer table.

use time::macros::date;
use time::Date;

/// TAI-UTC offset in effect on 1972-01-01.
const BASE_TAI_OFFSET: i32 = 10;

/// Days on which a leap second was inserted at 23:59:60 UTC.
const BUILTIN_LEAP_DAYS: [Date; 27] = [
    date!(1972 - 06 - 30),
    date!(1972 - 12 - 31),
    date!(1973 - 12 - 31),
    date!(1974 - 12 - 31),
    date!(1975 - 12 - 31),
    date!(1976 - 12 - 31),
    date!(1977 - 12 - 31),
    date!(1978 - 12 - 31),
    date!(1979 - 12 - 31),
    date!(1981 - 06 - 30),
    date!(1982 - 06 - 30),
    date!(1983 - 06 - 30),
    date!(1985 - 06 - 30),
    date!(1987 - 12 - 31),
    date!(1989 - 12 - 31),
    date!(1990 - 12 - 31),
    date!(1992 - 06 - 30),
    date!(1993 - 06 - 30),
    date!(1994 - 06 - 30),
    date!(1995 - 12 - 31),
    date!(1997 - 06 - 30),
    date!(1998 - 12 - 31),
    date!(2005 - 12 - 31),
    date!(2008 - 12 - 31),
    date!(2012 - 06 - 30),
    date!(2015 - 06 - 30),
    date!(2016 - 12 - 31),
];

/// Cumulative leap-second offsets keyed by (year, day-of-year).
#[derive(Clone, Debug)]
pub struct LeapSeconds {
    /// Sorted insertion days.
    days: Vec<Date>,
}

impl LeapSeconds {
    /// The table of leap seconds announced up to the time of writing.
    pub fn builtin() -> Self {
        Self {
            days: BUILTIN_LEAP_DAYS.to_vec(),
        }
    }

    /// Build a table from an explicit list of insertion days.
    pub fn from_days(mut days: Vec<Date>) -> Self {
        days.sort();
        days.dedup();
        Self { days }
    }

    /// TAI-UTC offset in seconds at 00:00:00 of day `day_of_year` of `year`.
    ///
    /// A leap second inserted at the end of day D is counted from day D+1.
    /// Out-of-range days are clamped into the year.
    pub fn offset(&self, year: i32, day_of_year: u16) -> i32 {
        let last = time::util::days_in_year(year);
        let doy = day_of_year.clamp(1, last);
        let day = match Date::from_ordinal_date(year, doy) {
            Ok(day) => day,
            Err(_) => return BASE_TAI_OFFSET,
        };
        self.offset_on(day)
    }

    /// TAI-UTC offset in seconds at the start of `day`.
    pub fn offset_on(&self, day: Date) -> i32 {
        let inserted = self.days.partition_point(|d| *d < day);
        BASE_TAI_OFFSET + inserted as i32
    }
}

impl Default for LeapSeconds {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_counts_from_following_day() {
        let table = LeapSeconds::builtin();
        // 2015-06-30 is day 181, 2015-07-01 is day 182.
        assert_eq!(table.offset(2015, 181), 35);
        assert_eq!(table.offset(2015, 182), 36);
    }

    #[test]
    fn offset_since_last_table_entry_is_stable() {
        let table = LeapSeconds::builtin();
        assert_eq!(table.offset(2017, 1), 37);
        assert_eq!(table.offset(2026, 200), 37);
    }

    #[test]
    fn custom_table_is_sorted() {
        let table = LeapSeconds::from_days(vec![date!(2030 - 12 - 31), date!(2030 - 06 - 30)]);
        assert_eq!(table.offset(2030, 1), BASE_TAI_OFFSET);
        assert_eq!(table.offset(2030, 200), BASE_TAI_OFFSET + 1);
        assert_eq!(table.offset(2031, 1), BASE_TAI_OFFSET + 2);
    }
}
