//! Core types shared by the conversion stages
//!
//! Registry records, the filter level, and the timestamp formats used by the
//! sensor's file names, data rows, and the visit table.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Number of comma-separated fields in every data row
pub const CHANNEL_COUNT: usize = 22;

/// Device-native sampling rate (one row every 5 seconds)
pub const SAMPLES_PER_MINUTE: usize = 12;

/// Expected rows for one full day of recording
pub const SAMPLES_PER_DAY: usize = SAMPLES_PER_MINUTE * 60 * 24;

/// Placeholder participant id used when the folder name is unusable
pub const SENTINEL_PARTICIPANT: &str = "NPID";

/// Placeholder device-assembly id used when the folder name is unusable
pub const SENTINEL_DEVICE: &str = "999";

/// Visit table key that is always present
pub const SENTINEL_VISIT_KEY: &str = "0000";

/// Serial reported when a device-assembly id is not in the serial table
pub const SENTINEL_SERIAL: &str = "NO_SEN55_IN_TABLE";

/// Placeholder for values the visit table left empty
pub const PLACEHOLDER: &str = "TBD";

/// Value reported for header tokens that were never seen
pub const UNKNOWN: &str = "unknown";

/// Data row timestamp format, e.g. `2023-08-01 12:00:05`
pub const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// File name stem format, e.g. `20230801120000`
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// How aggressively data is filtered before export
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterLevel {
    /// Remove only corrupted rows
    CorruptOnly,
    /// Also skip files holding less than a minute of data
    ShortFiles,
    /// Also trim the visit-demo lead-in
    Max,
}

impl Default for FilterLevel {
    fn default() -> Self {
        FilterLevel::Max
    }
}

impl FilterLevel {
    pub fn as_u8(&self) -> u8 {
        match self {
            FilterLevel::CorruptOnly => 0,
            FilterLevel::ShortFiles => 1,
            FilterLevel::Max => 2,
        }
    }

    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(FilterLevel::CorruptOnly),
            1 => Some(FilterLevel::ShortFiles),
            2 => Some(FilterLevel::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterLevel::CorruptOnly => "corrupt_only",
            FilterLevel::ShortFiles => "short_files",
            FilterLevel::Max => "max",
        }
    }
}

impl fmt::Display for FilterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the level name or its number (`0`, `1`, `2`)
impl FromStr for FilterLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let by_name = [FilterLevel::CorruptOnly, FilterLevel::ShortFiles, FilterLevel::Max]
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s));
        by_name
            .or_else(|| s.parse::<u8>().ok().and_then(FilterLevel::from_u8))
            .ok_or_else(|| {
                format!(
                    "unknown filter level {}; expected corrupt_only, short_files, max, or 0-2",
                    s
                )
            })
    }
}

/// One participant's row of the visit table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    /// 4-digit participant id
    pub participant_id: String,
    /// Study site
    pub site: String,
    /// Date the device was handed to the participant
    pub visit_date: String,
    /// Date the device came back
    pub return_date: String,
    /// Scheduled appointment (date, optionally with time)
    pub appointment: String,
    /// Whether the appointment and visit dates agree
    pub dates_agree: bool,
    /// 3-character device-assembly id
    pub device_id: String,
    /// Where the sensor was placed in the home
    pub location: String,
    /// Data-validity flag as entered by staff
    pub data_ok: String,
}

impl VisitRecord {
    /// The fallback record used when a participant is missing from the table
    pub fn sentinel() -> Self {
        Self {
            participant_id: SENTINEL_VISIT_KEY.to_string(),
            site: "no_site".to_string(),
            visit_date: "2023-07-02".to_string(),
            return_date: PLACEHOLDER.to_string(),
            appointment: PLACEHOLDER.to_string(),
            dates_agree: true,
            device_id: "000".to_string(),
            location: PLACEHOLDER.to_string(),
            data_ok: "yes".to_string(),
        }
    }

    /// `yes` and `ok` (any case) mark the data as usable
    pub fn data_marked_valid(&self) -> bool {
        matches!(self.data_ok.trim().to_lowercase().as_str(), "yes" | "ok")
    }
}

impl Default for VisitRecord {
    fn default() -> Self {
        VisitRecord::sentinel()
    }
}

/// One row of the device-assembly to serial table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// 3-character device-assembly id
    pub device_id: String,
    /// 16-character SEN55 serial
    pub serial: String,
    /// Site the assembly was built for
    pub site: String,
}

/// A file removed from the working list, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Left-pad a device-assembly id with zeros to 3 characters
pub fn pad_device_id(raw: &str) -> String {
    let trimmed = raw.trim();
    // Spreadsheet exports sometimes carry ids as floats ("52.0")
    let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    format!("{:0>3}", trimmed)
}

/// Parse a data-row timestamp
pub fn parse_row_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), ROW_TIMESTAMP_FORMAT).ok()
}

/// Timestamp in the first field of a data row
pub fn row_timestamp(row: &str) -> Option<NaiveDateTime> {
    row.split(',').next().and_then(parse_row_timestamp)
}

/// Parse a 14-digit file name stem
pub fn parse_filename_timestamp(stem: &str) -> Option<NaiveDateTime> {
    if stem.len() != 14 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stem, FILENAME_TIMESTAMP_FORMAT).ok()
}

/// Parse a visit-table date. Accepts ISO dates, US-style dates, and a trailing
/// time of day, which is ignored.
pub fn parse_visit_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.trim().split(|c: char| c == ' ' || c == 'T').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%m/%d/%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn test_pad_device_id() {
        assert_eq!(pad_device_id("52"), "052");
        assert_eq!(pad_device_id("7"), "007");
        assert_eq!(pad_device_id("052"), "052");
        assert_eq!(pad_device_id(" 52.0 "), "052");
        assert_eq!(pad_device_id("123"), "123");
    }

    #[test]
    fn test_filename_timestamp() {
        let ts = parse_filename_timestamp("20230801120000").unwrap();
        assert_eq!(
            ts,
            NaiveDate::from_ymd_opt(2023, 8, 1)
                .unwrap()
                .and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
        );
        assert!(parse_filename_timestamp("2023080112000").is_none());
        assert!(parse_filename_timestamp("notatimestamp1").is_none());
        assert!(parse_filename_timestamp("20231301120000").is_none());
    }

    #[test]
    fn test_row_timestamp() {
        let row = "2023-08-01 12:00:05,1,2,3";
        assert!(row_timestamp(row).is_some());
        assert!(row_timestamp("garbage,1,2").is_none());
        assert!(row_timestamp("").is_none());
    }

    #[test]
    fn test_visit_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 8, 1);
        assert_eq!(parse_visit_date("2023-08-01"), expected);
        assert_eq!(parse_visit_date("08/01/2023"), expected);
        assert_eq!(parse_visit_date("2023-08-01 09:30"), expected);
        assert_eq!(parse_visit_date("TBD"), None);
        assert_eq!(parse_visit_date(""), None);
    }

    #[test]
    fn test_data_marked_valid() {
        let mut record = VisitRecord::sentinel();
        assert!(record.data_marked_valid());
        record.data_ok = "OK".to_string();
        assert!(record.data_marked_valid());
        record.data_ok = "no".to_string();
        assert!(!record.data_marked_valid());
        record.data_ok = PLACEHOLDER.to_string();
        assert!(!record.data_marked_valid());
    }

    #[test]
    fn test_filter_level_round_trip_numbers() {
        for level in [FilterLevel::CorruptOnly, FilterLevel::ShortFiles, FilterLevel::Max] {
            assert_eq!(FilterLevel::from_u8(level.as_u8()), Some(level));
        }
        assert_eq!(FilterLevel::from_u8(3), None);
        assert_eq!("2".parse::<FilterLevel>(), Ok(FilterLevel::Max));
        assert_eq!("0".parse::<FilterLevel>(), Ok(FilterLevel::CorruptOnly));
        assert_eq!("short_files".parse::<FilterLevel>(), Ok(FilterLevel::ShortFiles));
        assert_eq!("MAX".parse::<FilterLevel>(), Ok(FilterLevel::Max));
        assert!("3".parse::<FilterLevel>().is_err());
        assert!("everything".parse::<FilterLevel>().is_err());
        assert_eq!(FilterLevel::CorruptOnly.to_string(), "corrupt_only");
        assert!(FilterLevel::Max > FilterLevel::ShortFiles);
    }
}
