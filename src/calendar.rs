//! Calendar units and pandas-style frequency strings
//!
//! Shared by the streaming cursor (calendar-unit chunking), the decumulator
//! (jump detection) and the resample engine (bin construction).

use crate::errors::{ClimNormError, Result};
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::fmt;

/// A unit of calendar time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl CalendarUnit {
    /// Parse a unit name or pandas offset alias (`h`, `D`, `MS`, `YS`, `month`, ...).
    pub fn parse(s: &str) -> Result<Self> {
        let unit = match s.trim() {
            "min" | "T" | "minute" | "minutes" => Self::Minute,
            "h" | "H" | "hour" | "hours" => Self::Hour,
            "D" | "d" | "day" | "days" => Self::Day,
            "W" | "w" | "week" | "weeks" => Self::Week,
            "M" | "MS" | "ME" | "month" | "months" => Self::Month,
            "Y" | "YS" | "YE" | "A" | "AS" | "year" | "years" => Self::Year,
            other => return Err(ClimNormError::InvalidFrequency(other.to_string())),
        };
        Ok(unit)
    }

    /// Units whose length depends on the calendar
    #[must_use]
    pub const fn is_calendar(self) -> bool {
        matches!(self, Self::Month | Self::Year)
    }

    /// Fixed length of `n` units, `None` for months and years or when out of range
    pub fn fixed_duration(self, n: i64) -> Option<Duration> {
        match self {
            Self::Minute => Duration::try_minutes(n),
            Self::Hour => Duration::try_hours(n),
            Self::Day => Duration::try_days(n),
            Self::Week => Duration::try_weeks(n),
            Self::Month | Self::Year => None,
        }
    }

    /// Integer key that changes exactly when `t` crosses a boundary of this unit
    pub fn period_key(self, t: NaiveDateTime) -> i64 {
        match self {
            Self::Minute => t.and_utc().timestamp().div_euclid(60),
            Self::Hour => t.and_utc().timestamp().div_euclid(3600),
            Self::Day => i64::from(t.date().num_days_from_ce()),
            Self::Week => {
                let w = t.date().iso_week();
                i64::from(w.year()) * 100 + i64::from(w.week())
            }
            Self::Month => month_index(t),
            Self::Year => i64::from(t.year()),
        }
    }
}

impl fmt::Display for CalendarUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        };
        f.write_str(s)
    }
}

/// Months since year 0 (January of year 0 is 0)
pub fn month_index(t: NaiveDateTime) -> i64 {
    i64::from(t.year()) * 12 + i64::from(t.month0())
}

fn from_month_index(index: i64) -> Option<NaiveDateTime> {
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
    NaiveDate::from_ymd_opt(year, month, 1).map(|d| d.and_time(NaiveTime::MIN))
}

/// Move `t` by `n` units. Month and year arithmetic clamps to the end of the month.
pub fn advance(t: NaiveDateTime, n: i64, unit: CalendarUnit) -> Option<NaiveDateTime> {
    match unit {
        CalendarUnit::Month | CalendarUnit::Year => {
            let months = if unit == CalendarUnit::Year { n.checked_mul(12)? } else { n };
            let m = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
            if months >= 0 {
                t.checked_add_months(m)
            } else {
                t.checked_sub_months(m)
            }
        }
        _ => t.checked_add_signed(unit.fixed_duration(n)?),
    }
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = first.checked_add_months(Months::new(1))?;
    u32::try_from((next - first).num_days()).ok()
}

/// Parse `YYYY-MM-DD`, `YYYY-MM-DD HH:MM[:SS]` or the `T`-separated ISO form.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    let text = s.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(t);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|e| ClimNormError::Config(format!("invalid date '{s}': {e}")))
}

/// Offsets at or beyond this many milliseconds do not fit a time delta
const MAX_MILLIS: f64 = 9.2e18;

/// Decode CF numeric time values (`"hours since 1900-01-01 00:00:00"`).
pub fn decode_cf_time(units: &str, values: &[f64]) -> Result<Vec<NaiveDateTime>> {
    let (unit, reference) = units
        .split_once(" since ")
        .ok_or_else(|| ClimNormError::Config(format!("not a CF time unit: '{units}'")))?;
    let seconds = match unit.trim() {
        "seconds" | "second" | "s" => 1.0,
        "minutes" | "minute" | "min" => 60.0,
        "hours" | "hour" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        other => {
            return Err(ClimNormError::Config(format!(
                "unsupported CF time unit '{other}'"
            )))
        }
    };
    // Drop a trailing time zone designator such as "Z" or "UTC"
    let reference = reference
        .trim()
        .trim_end_matches(" UTC")
        .trim_end_matches('Z');
    let origin = parse_datetime(reference)?;
    values
        .iter()
        .map(|v| {
            let out_of_range = || ClimNormError::Config(format!("time value {v} out of range"));
            let millis = (v * seconds * 1000.0).round();
            if !millis.is_finite() || millis.abs() >= MAX_MILLIS {
                return Err(out_of_range());
            }
            #[allow(clippy::cast_possible_truncation)]
            let offset = Duration::try_milliseconds(millis as i64).ok_or_else(out_of_range)?;
            origin.checked_add_signed(offset).ok_or_else(out_of_range)
        })
        .collect()
}

/// How output bins are labelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinLabel {
    /// Bin start (`MS`, `YS`, `D`, `h`, ...)
    Start,
    /// Last day of the period (`M`, `ME`, `Y`, `YE`, `A`)
    End,
}

/// A parsed resampling frequency such as `3h`, `MS` or `monthly`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frequency {
    pub count: u32,
    pub unit: CalendarUnit,
    pub label: BinLabel,
    text: String,
}

impl Frequency {
    pub fn parse(s: &str) -> Result<Self> {
        let text = s.trim();
        let alias = match text {
            "hourly" => "h",
            "daily" => "D",
            "weekly" => "W",
            "monthly" => "MS",
            "yearly" | "annual" => "YS",
            other => other,
        };
        let split = alias
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ClimNormError::InvalidFrequency(s.to_string()))?;
        let (num, code) = alias.split_at(split);
        let count = if num.is_empty() {
            1
        } else {
            num.parse::<u32>()
                .map_err(|_| ClimNormError::InvalidFrequency(s.to_string()))?
        };
        if count == 0 {
            return Err(ClimNormError::InvalidFrequency(s.to_string()));
        }
        let unit = CalendarUnit::parse(code).map_err(|_| ClimNormError::InvalidFrequency(s.to_string()))?;
        let label = match code {
            "W" | "M" | "ME" | "Y" | "YE" | "A" => BinLabel::End,
            _ => BinLabel::Start,
        };
        Ok(Self {
            count,
            unit,
            label,
            text: text.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Start of the bin containing `t`, with bins aligned on `origin`
    /// (the first timestamp of the data).
    ///
    /// Weekly bins run Monday to Sunday, so with the end label each one is
    /// stamped on its Sunday.
    pub fn bin_start(&self, t: NaiveDateTime, origin: NaiveDateTime) -> Option<NaiveDateTime> {
        match self.unit {
            CalendarUnit::Month | CalendarUnit::Year => {
                let per_bin = i64::from(self.count) * if self.unit == CalendarUnit::Year { 12 } else { 1 };
                let base = if self.unit == CalendarUnit::Year {
                    i64::from(origin.year()) * 12
                } else {
                    month_index(origin)
                };
                let idx = (month_index(t) - base).div_euclid(per_bin);
                from_month_index(base + idx * per_bin)
            }
            _ => {
                let width = self.unit.fixed_duration(i64::from(self.count))?;
                let day = origin.date();
                let day = if self.unit == CalendarUnit::Week {
                    day.checked_sub_signed(Duration::try_days(i64::from(day.weekday().num_days_from_monday()))?)?
                } else {
                    day
                };
                let base = day.and_time(NaiveTime::MIN);
                let width_s = width.num_seconds();
                if width_s <= 0 {
                    return None;
                }
                let offset = (t - base).num_seconds().div_euclid(width_s);
                base.checked_add_signed(Duration::try_seconds(offset.checked_mul(width_s)?)?)
            }
        }
    }

    /// Start of the bin following the one starting at `start`
    pub fn next_bin(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        advance(start, i64::from(self.count), self.unit)
    }

    /// Output timestamp for the bin starting at `start`
    pub fn label_for(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        match self.label {
            BinLabel::Start => Some(start),
            BinLabel::End => self
                .next_bin(start)?
                .checked_sub_signed(Duration::days(1))
                .map(|d| d.date().and_time(NaiveTime::MIN)),
        }
    }

    /// True for daily and finer frequencies, which can be centred with a fixed duration
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        !self.unit.is_calendar()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Midnight of the first day of the month containing `t`
pub fn month_start(t: NaiveDateTime) -> Option<NaiveDateTime> {
    from_month_index(month_index(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn parse_named_and_numbered() {
        let f = Frequency::parse("monthly").unwrap();
        assert_eq!((f.count, f.unit, f.label), (1, CalendarUnit::Month, BinLabel::Start));
        let f = Frequency::parse("6h").unwrap();
        assert_eq!((f.count, f.unit), (6, CalendarUnit::Hour));
        let f = Frequency::parse("ME").unwrap();
        assert_eq!(f.label, BinLabel::End);
        assert!(Frequency::parse("5Q").is_err());
        assert!(Frequency::parse("0D").is_err());
        assert!(Frequency::parse("12").is_err());
    }

    #[test]
    fn advance_months_clamps() {
        assert_eq!(advance(dt(2020, 1, 31, 0), 1, CalendarUnit::Month), Some(dt(2020, 2, 29, 0)));
        assert_eq!(advance(dt(2020, 3, 1, 0), -1, CalendarUnit::Year), Some(dt(2019, 3, 1, 0)));
        assert_eq!(advance(dt(2020, 3, 1, 0), 6, CalendarUnit::Hour), Some(dt(2020, 3, 1, 6)));
    }

    #[test]
    fn bin_start_alignment() {
        let f = Frequency::parse("2MS").unwrap();
        let origin = dt(2020, 1, 15, 0);
        assert_eq!(f.bin_start(dt(2020, 2, 20, 3), origin), Some(dt(2020, 1, 1, 0)));
        assert_eq!(f.bin_start(dt(2020, 3, 1, 0), origin), Some(dt(2020, 3, 1, 0)));
        let f = Frequency::parse("6h").unwrap();
        assert_eq!(f.bin_start(dt(2020, 1, 1, 7), dt(2020, 1, 1, 1)), Some(dt(2020, 1, 1, 6)));
    }

    #[test]
    fn end_label_is_last_day() {
        let f = Frequency::parse("ME").unwrap();
        assert_eq!(f.label_for(dt(2021, 2, 1, 0)), Some(dt(2021, 2, 28, 0)));
    }

    #[test]
    fn parse_dates() {
        assert_eq!(parse_datetime("2020-03-01").unwrap(), dt(2020, 3, 1, 0));
        assert_eq!(parse_datetime("2020-03-01T06:00:00").unwrap(), dt(2020, 3, 1, 6));
        assert_eq!(parse_datetime("2020-03-01 06:00").unwrap(), dt(2020, 3, 1, 6));
        assert!(parse_datetime("March 1st").is_err());
    }

    #[test]
    fn cf_time_decoding() {
        let t = decode_cf_time("hours since 2000-01-01 00:00:00", &[0.0, 6.0, 24.0]).unwrap();
        assert_eq!(t, vec![dt(2000, 1, 1, 0), dt(2000, 1, 1, 6), dt(2000, 1, 2, 0)]);
        let t = decode_cf_time("days since 2000-01-01", &[31.0]).unwrap();
        assert_eq!(t, vec![dt(2000, 2, 1, 0)]);
        assert!(decode_cf_time("fortnights since 2000-01-01", &[1.0]).is_err());
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e300] {
            assert!(decode_cf_time("hours since 2000-01-01", &[bad]).is_err());
        }
    }

    #[test]
    fn advance_out_of_range_is_none() {
        assert_eq!(advance(dt(2020, 1, 1, 0), i64::MAX, CalendarUnit::Hour), None);
        assert_eq!(advance(dt(2020, 1, 1, 0), i64::MAX, CalendarUnit::Week), None);
        assert_eq!(CalendarUnit::Day.fixed_duration(i64::MAX), None);
    }

    #[test]
    fn weekly_bins_end_on_sunday() {
        let f = Frequency::parse("W").unwrap();
        assert_eq!(f.label, BinLabel::End);
        // 2020-01-01 is a Wednesday
        let origin = dt(2020, 1, 1, 0);
        assert_eq!(f.bin_start(dt(2020, 1, 5, 12), origin), Some(dt(2019, 12, 30, 0)));
        assert_eq!(f.bin_start(dt(2020, 1, 6, 0), origin), Some(dt(2020, 1, 6, 0)));
        assert_eq!(f.label_for(dt(2019, 12, 30, 0)), Some(dt(2020, 1, 5, 0)));
        assert_eq!(Frequency::parse("weekly").unwrap().label, BinLabel::End);
    }

    #[test]
    fn days_in_month_leap() {
        assert_eq!(days_in_month(2020, 2), Some(29));
        assert_eq!(days_in_month(2021, 2), Some(28));
        assert_eq!(days_in_month(2021, 12), Some(31));
    }
}
