use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date '{0}', expected YYYYMMDD")]
pub struct DateParseError(pub String);

/// A calendar day, written `YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordDate(NaiveDate);

impl RecordDate {
    pub fn from_yyyymmdd(value: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt((value / 10000) as i32, (value / 100) % 100, value % 100).map(Self)
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }

    pub fn as_u32(&self) -> u32 {
        self.0.year() as u32 * 10000 + self.0.month() * 100 + self.0.day()
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// `yyyy/mm/dd`, the layout used in archive keys.
    pub fn key_segment(&self) -> String {
        self.0.format("%Y/%m/%d").to_string()
    }
}

impl fmt::Display for RecordDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

impl FromStr for RecordDate {
    type Err = DateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DateParseError(s.to_string()));
        }
        s.parse::<u32>()
            .ok()
            .and_then(Self::from_yyyymmdd)
            .ok_or_else(|| DateParseError(s.to_string()))
    }
}

/// Threshold before which every record is public.
///
/// Kept as the raw `YYYYMMDD` integer: one year before Feb 29 is not a real
/// day but still a valid threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CutoffDate(u32);

impl CutoffDate {
    pub fn new(yyyymmdd: u32) -> Self {
        Self(yyyymmdd)
    }

    /// Same month and day, one year earlier.
    pub fn one_year_before(today: NaiveDate) -> Self {
        Self((today.year() - 1) as u32 * 10000 + today.month() * 100 + today.day())
    }

    pub fn from_today() -> Self {
        Self::one_year_before(Utc::now().date_naive())
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// True when `date` is strictly older than the cutoff.
    pub fn precedes(&self, date: RecordDate) -> bool {
        date.as_u32() < self.0
    }

    /// The most recent calendar day strictly before the cutoff.
    pub fn last_eligible_day(&self) -> Option<RecordDate> {
        if let Some(date) = RecordDate::from_yyyymmdd(self.0) {
            return date.naive().pred_opt().map(RecordDate::from_naive);
        }
        let month_start = self.0 - self.0 % 100;
        (1..(self.0 % 100).min(32))
            .rev()
            .find_map(|day| RecordDate::from_yyyymmdd(month_start + day))
    }
}

impl fmt::Display for CutoffDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_date_round_trip_text() {
        let date: RecordDate = "20170516".parse().unwrap();
        assert_eq!(date.as_u32(), 20170516);
        assert_eq!(date.to_string(), "20170516");
        assert_eq!(date.key_segment(), "2017/05/16");
        assert!("2017051".parse::<RecordDate>().is_err());
        assert!("20170230".parse::<RecordDate>().is_err());
        assert!("+2017051".parse::<RecordDate>().is_err());
    }

    #[test]
    fn test_one_year_before() {
        let today = NaiveDate::from_ymd_opt(2018, 3, 15).unwrap();
        assert_eq!(CutoffDate::one_year_before(today).as_u32(), 20170315);

        let leap = NaiveDate::from_ymd_opt(2020, 2, 29).unwrap();
        assert_eq!(CutoffDate::one_year_before(leap).as_u32(), 20190229);
    }

    #[test]
    fn test_precedes() {
        let cutoff = CutoffDate::new(20160315);
        assert!(cutoff.precedes(RecordDate::from_yyyymmdd(20160314).unwrap()));
        assert!(!cutoff.precedes(RecordDate::from_yyyymmdd(20160315).unwrap()));
        assert!(!cutoff.precedes(RecordDate::from_yyyymmdd(20170225).unwrap()));
    }

    #[test]
    fn test_last_eligible_day() {
        assert_eq!(
            CutoffDate::new(20170315).last_eligible_day().unwrap().as_u32(),
            20170314
        );
        assert_eq!(
            CutoffDate::new(20170301).last_eligible_day().unwrap().as_u32(),
            20170228
        );
        assert_eq!(
            CutoffDate::new(20190229).last_eligible_day().unwrap().as_u32(),
            20190228
        );
        assert_eq!(
            CutoffDate::new(20170101).last_eligible_day().unwrap().as_u32(),
            20161231
        );
    }
}
