//! Archive key layout.
//!
//! Keys look like
//! `sidestream/2017/05/16/20170516T000000Z-mlab1-atl06-sidestream-0000.tgz`.
//! The embargoed half of an archive lives in the private container under the
//! same key with a marker before the extension (`...-0000-e.tgz`), so the
//! private copy can be found from the public key without an index.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::RecordDate;

/// Weekday label used when an archive key carries no parseable date.
pub const UNKNOWN_DAY: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveNaming {
    #[serde(default = "default_record_type")]
    pub record_type: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_embargo_marker")]
    pub embargo_marker: String,
}

fn default_record_type() -> String {
    "sidestream".to_string()
}

fn default_extension() -> String {
    ".tgz".to_string()
}

fn default_embargo_marker() -> String {
    "-e".to_string()
}

impl Default for ArchiveNaming {
    fn default() -> Self {
        Self {
            record_type: default_record_type(),
            extension: default_extension(),
            embargo_marker: default_embargo_marker(),
        }
    }
}

impl ArchiveNaming {
    /// `<record_type>/yyyy/mm/dd`
    pub fn day_prefix(&self, date: RecordDate) -> String {
        format!("{}/{}", self.record_type, date.key_segment())
    }

    /// Whether a source key is an archive this pipeline should split.
    pub fn is_candidate(&self, key: &str) -> bool {
        key.contains(&self.record_type) && key.ends_with(&self.extension)
    }

    /// Key of the embargoed counterpart of `key`.
    pub fn private_key(&self, key: &str) -> String {
        match key.strip_suffix(&self.extension) {
            Some(stem) => format!("{stem}{}{}", self.embargo_marker, self.extension),
            None => format!("{key}{}", self.embargo_marker),
        }
    }
}

/// Date segment right after the first path component, e.g. `2017/05/16`.
pub fn key_date(key: &str) -> Option<RecordDate> {
    let (_, rest) = key.split_once('/')?;
    let segment = rest.get(0..10)?;
    NaiveDate::parse_from_str(segment, "%Y/%m/%d")
        .ok()
        .map(RecordDate::from_naive)
}

/// Weekday name of the date embedded in an archive key.
pub fn day_of_week(key: &str) -> Option<&'static str> {
    key_date(key).map(|date| weekday_name(date.naive().weekday()))
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
