//! Market calendar: weekly schedule, daily hours and holidays.
//!
//! Day and time windows are both intervals on a cyclic index space (7 days,
//! 1440 minutes), so overnight sessions and weekend-spanning schedules need no
//! special casing.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::Serialize;
use std::fmt;

use crate::domain::error::TradesimError;

pub const DAYS_PER_WEEK: u32 = 7;
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Whether `value` lies in the cyclic interval starting at `start` and ending
/// at `end` on a ring of size `modulus`.
///
/// With `inclusive_end` the interval is `[start, end]`; otherwise it is
/// `[start, end)` and `start == end` covers the whole ring.
pub fn cyclic_contains(start: u32, end: u32, value: u32, modulus: u32, inclusive_end: bool) -> bool {
    let m = modulus as i64;
    let span = (end as i64 - start as i64).rem_euclid(m);
    let offset = (value as i64 - start as i64).rem_euclid(m);
    if inclusive_end {
        offset <= span
    } else if span == 0 {
        true
    } else {
        offset < span
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Weekly trading window, inclusive at both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketSchedule {
    pub start_day: Weekday,
    pub end_day: Weekday,
    pub is_holiday: bool,
    pub note: String,
}

impl Default for MarketSchedule {
    fn default() -> Self {
        MarketSchedule {
            start_day: Weekday::Mon,
            end_day: Weekday::Fri,
            is_holiday: false,
            note: String::new(),
        }
    }
}

impl MarketSchedule {
    pub fn contains(&self, day: Weekday) -> bool {
        cyclic_contains(
            self.start_day.num_days_from_monday(),
            self.end_day.num_days_from_monday(),
            day.num_days_from_monday(),
            DAYS_PER_WEEK,
            true,
        )
    }

    pub fn wraps_week(&self) -> bool {
        self.start_day.num_days_from_monday() > self.end_day.num_days_from_monday()
    }
}

/// Daily trading window: open inclusive, close exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub is_active: bool,
}

impl Default for MarketHours {
    fn default() -> Self {
        MarketHours {
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            is_active: true,
        }
    }
}

impl MarketHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        cyclic_contains(
            minute_of_day(self.open),
            minute_of_day(self.close),
            minute_of_day(time),
            MINUTES_PER_DAY,
            false,
        )
    }

    pub fn is_overnight(&self) -> bool {
        minute_of_day(self.open) > minute_of_day(self.close)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketHoliday {
    pub date: NaiveDate,
    pub label: String,
}

/// A holiday observed on the same month and day every year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NationalHoliday {
    pub month: u32,
    pub day: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NationalHolidays {
    holidays: Vec<NationalHoliday>,
}

impl Default for NationalHolidays {
    fn default() -> Self {
        let table = [
            (1, 1, "New Year's Day"),
            (6, 19, "Juneteenth"),
            (7, 4, "Independence Day"),
            (11, 11, "Veterans Day"),
            (12, 25, "Christmas Day"),
        ];
        NationalHolidays {
            holidays: table
                .iter()
                .map(|&(month, day, label)| NationalHoliday {
                    month,
                    day,
                    label: label.to_string(),
                })
                .collect(),
        }
    }
}

impl NationalHolidays {
    pub fn empty() -> Self {
        NationalHolidays {
            holidays: Vec::new(),
        }
    }

    /// Parse a `MM-DD=Label` list separated by `,`.
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut holidays = Vec::new();
        for entry in input.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (date, label) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected MM-DD=Label, got '{entry}'"))?;
            let (month, day) = date
                .trim()
                .split_once('-')
                .ok_or_else(|| format!("expected MM-DD, got '{}'", date.trim()))?;
            let month: u32 = month
                .parse()
                .map_err(|_| format!("invalid month in '{entry}'"))?;
            let day: u32 = day.parse().map_err(|_| format!("invalid day in '{entry}'"))?;
            // 2024 is a leap year, so Feb 29 is accepted.
            if NaiveDate::from_ymd_opt(2024, month, day).is_none() {
                return Err(format!("no such calendar day in '{entry}'"));
            }
            holidays.push(NationalHoliday {
                month,
                day,
                label: label.trim().to_string(),
            });
        }
        Ok(NationalHolidays { holidays })
    }

    pub fn lookup(&self, date: NaiveDate) -> Option<&NationalHoliday> {
        self.holidays
            .iter()
            .find(|h| h.month == date.month() && h.day == date.day())
    }

    pub fn iter(&self) -> impl Iterator<Item = &NationalHoliday> {
        self.holidays.iter()
    }

    pub fn len(&self) -> usize {
        self.holidays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holidays.is_empty()
    }
}

/// Admin-editable calendar rows as persisted by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarSettings {
    pub schedule: MarketSchedule,
    pub hours: MarketHours,
    pub holidays: Vec<MarketHoliday>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureReason {
    NationalHoliday(String),
    MarketHoliday(String),
    ScheduleHoliday(String),
    HoursInactive,
    OutsideTradingDays,
    OutsideTradingHours,
}

impl fmt::Display for ClosureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosureReason::NationalHoliday(label) => write!(f, "national holiday ({label})"),
            ClosureReason::MarketHoliday(label) => write!(f, "market holiday ({label})"),
            ClosureReason::ScheduleHoliday(note) if note.is_empty() => {
                write!(f, "schedule marked as holiday")
            }
            ClosureReason::ScheduleHoliday(note) => {
                write!(f, "schedule marked as holiday ({note})")
            }
            ClosureReason::HoursInactive => write!(f, "trading hours inactive"),
            ClosureReason::OutsideTradingDays => write!(f, "outside trading days"),
            ClosureReason::OutsideTradingHours => write!(f, "outside trading hours"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketCalendar {
    pub settings: CalendarSettings,
    pub national: NationalHolidays,
}

impl MarketCalendar {
    pub fn new(settings: CalendarSettings, national: NationalHolidays) -> Self {
        MarketCalendar { settings, national }
    }

    /// First reason the market is closed at `now`, or `None` when open.
    pub fn closure_reason(&self, now: NaiveDateTime) -> Option<ClosureReason> {
        let date = now.date();
        if let Some(h) = self.national.lookup(date) {
            return Some(ClosureReason::NationalHoliday(h.label.clone()));
        }
        if let Some(h) = self.settings.holidays.iter().find(|h| h.date == date) {
            return Some(ClosureReason::MarketHoliday(h.label.clone()));
        }
        if self.settings.schedule.is_holiday {
            return Some(ClosureReason::ScheduleHoliday(
                self.settings.schedule.note.clone(),
            ));
        }
        if !self.settings.hours.is_active {
            return Some(ClosureReason::HoursInactive);
        }
        if !self.settings.schedule.contains(date.weekday()) {
            return Some(ClosureReason::OutsideTradingDays);
        }
        if !self.settings.hours.contains(now.time()) {
            return Some(ClosureReason::OutsideTradingHours);
        }
        None
    }

    pub fn is_open(&self, now: NaiveDateTime) -> bool {
        self.closure_reason(now).is_none()
    }
}

pub fn parse_weekday(input: &str) -> Result<Weekday, TradesimError> {
    input
        .trim()
        .parse::<Weekday>()
        .map_err(|_| TradesimError::invalid_input(format!("unknown weekday '{input}'")))
}

pub fn parse_time(input: &str) -> Result<NaiveTime, TradesimError> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| TradesimError::invalid_input(format!("invalid time '{input}' (expected HH:MM)")))
}

pub fn parse_date(input: &str) -> Result<NaiveDate, TradesimError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|_| {
        TradesimError::invalid_input(format!("invalid date '{input}' (expected YYYY-MM-DD)"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn hours(open: &str, close: &str) -> MarketHours {
        MarketHours {
            open: parse_time(open).unwrap(),
            close: parse_time(close).unwrap(),
            is_active: true,
        }
    }

    fn weekday_calendar() -> MarketCalendar {
        MarketCalendar::new(
            CalendarSettings {
                schedule: MarketSchedule::default(),
                hours: hours("09:00", "17:00"),
                holidays: Vec::new(),
            },
            NationalHolidays::empty(),
        )
    }

    #[test]
    fn open_on_wednesday_morning() {
        // 2024-01-10 is a Wednesday.
        assert!(weekday_calendar().is_open(at(2024, 1, 10, 10, 0)));
    }

    #[test]
    fn closed_on_saturday() {
        let cal = weekday_calendar();
        assert_eq!(
            cal.closure_reason(at(2024, 1, 13, 10, 0)),
            Some(ClosureReason::OutsideTradingDays)
        );
    }

    #[test]
    fn close_time_is_exclusive() {
        let cal = weekday_calendar();
        assert!(cal.is_open(at(2024, 1, 10, 9, 0)));
        assert!(cal.is_open(at(2024, 1, 10, 16, 59)));
        assert!(!cal.is_open(at(2024, 1, 10, 17, 0)));
    }

    #[test]
    fn market_holiday_closes_regardless_of_time() {
        let mut cal = weekday_calendar();
        cal.settings.holidays.push(MarketHoliday {
            date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            label: "Exchange maintenance".into(),
        });
        assert_eq!(
            cal.closure_reason(at(2024, 1, 10, 10, 0)),
            Some(ClosureReason::MarketHoliday("Exchange maintenance".into()))
        );
        assert!(cal.is_open(at(2024, 1, 11, 10, 0)));
    }

    #[test]
    fn national_holiday_recurs_every_year() {
        let mut cal = weekday_calendar();
        cal.national = NationalHolidays::default();
        // 2024-12-25 and 2025-12-25 are a Wednesday and a Thursday.
        assert!(!cal.is_open(at(2024, 12, 25, 10, 0)));
        assert!(!cal.is_open(at(2025, 12, 25, 10, 0)));
        assert!(cal.is_open(at(2024, 12, 24, 10, 0)));
    }

    #[test]
    fn schedule_holiday_flag_overrides() {
        let mut cal = weekday_calendar();
        cal.settings.schedule.is_holiday = true;
        cal.settings.schedule.note = "storm".into();
        let reason = cal.closure_reason(at(2024, 1, 10, 10, 0)).unwrap();
        assert_eq!(reason.to_string(), "schedule marked as holiday (storm)");
    }

    #[test]
    fn inactive_hours_close_market() {
        let mut cal = weekday_calendar();
        cal.settings.hours.is_active = false;
        assert_eq!(
            cal.closure_reason(at(2024, 1, 10, 10, 0)),
            Some(ClosureReason::HoursInactive)
        );
    }

    #[test]
    fn overnight_session() {
        let mut cal = weekday_calendar();
        cal.settings.hours = hours("22:00", "04:00");
        assert!(cal.settings.hours.is_overnight());
        assert!(cal.is_open(at(2024, 1, 10, 23, 30)));
        assert!(cal.is_open(at(2024, 1, 10, 2, 0)));
        assert!(!cal.is_open(at(2024, 1, 10, 12, 0)));
        assert!(!cal.is_open(at(2024, 1, 10, 4, 0)));
    }

    #[test]
    fn schedule_wrapping_the_weekend() {
        let schedule = MarketSchedule {
            start_day: Weekday::Fri,
            end_day: Weekday::Mon,
            is_holiday: false,
            note: String::new(),
        };
        assert!(schedule.wraps_week());
        assert!(schedule.contains(Weekday::Fri));
        assert!(schedule.contains(Weekday::Sat));
        assert!(schedule.contains(Weekday::Sun));
        assert!(schedule.contains(Weekday::Mon));
        assert!(!schedule.contains(Weekday::Tue));
        assert!(!schedule.contains(Weekday::Thu));
    }

    #[test]
    fn single_day_schedule() {
        let schedule = MarketSchedule {
            start_day: Weekday::Wed,
            end_day: Weekday::Wed,
            ..MarketSchedule::default()
        };
        assert!(schedule.contains(Weekday::Wed));
        assert!(!schedule.contains(Weekday::Thu));
    }

    #[test]
    fn equal_open_and_close_spans_full_day() {
        let h = hours("00:00", "00:00");
        assert!(h.contains(parse_time("00:00").unwrap()));
        assert!(h.contains(parse_time("23:59").unwrap()));
    }

    #[test]
    fn parse_national_holidays() {
        let parsed = NationalHolidays::parse("01-01=New Year, 12-26 = Boxing Day,").unwrap();
        assert_eq!(parsed.len(), 2);
        let boxing = parsed
            .lookup(NaiveDate::from_ymd_opt(2030, 12, 26).unwrap())
            .unwrap();
        assert_eq!(boxing.label, "Boxing Day");
    }

    #[test]
    fn parse_national_holidays_rejects_bad_entries() {
        assert!(NationalHolidays::parse("13-01=Nope").is_err());
        assert!(NationalHolidays::parse("02-30=Nope").is_err());
        assert!(NationalHolidays::parse("0101 New Year").is_err());
    }

    #[test]
    fn parse_inputs() {
        assert_eq!(parse_weekday("monday").unwrap(), Weekday::Mon);
        assert_eq!(parse_weekday("Fri").unwrap(), Weekday::Fri);
        assert!(parse_weekday("Funday").is_err());
        assert_eq!(
            parse_time("22:15").unwrap(),
            NaiveTime::from_hms_opt(22, 15, 0).unwrap()
        );
        assert!(parse_time("25:00").is_err());
        assert!(parse_date("2024-02-30").is_err());
    }

    proptest! {
        #[test]
        fn inclusive_interval_contains_its_endpoints(start in 0u32..7, end in 0u32..7) {
            prop_assert!(cyclic_contains(start, end, start, 7, true));
            prop_assert!(cyclic_contains(start, end, end, 7, true));
        }

        #[test]
        fn half_open_interval_and_its_complement_partition_the_day(
            open in 0u32..1440,
            close in 0u32..1440,
            minute in 0u32..1440,
        ) {
            prop_assume!(open != close);
            let inside = cyclic_contains(open, close, minute, 1440, false);
            let complement = cyclic_contains(close, open, minute, 1440, false);
            prop_assert!(inside != complement);
        }

        #[test]
        fn contiguous_interval_matches_plain_comparison(
            start in 0u32..1440,
            end in 0u32..1440,
            value in 0u32..1440,
        ) {
            prop_assume!(start < end);
            prop_assert_eq!(
                cyclic_contains(start, end, value, 1440, false),
                start <= value && value < end
            );
        }
    }
}
