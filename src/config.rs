//! Converter configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use crate::error::ConvertError;
use crate::types::{FilterLevel, CHANNEL_COUNT, SAMPLES_PER_MINUTE};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Largest accepted window margin (one leap year)
pub const MAX_WINDOW_MARGIN_HOURS: i64 = 24 * 366;

/// Largest accepted file name tolerance (one raw file interval)
pub const MAX_FILENAME_TOLERANCE_SECS: i64 = 3600;

/// Settings for one conversion pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Separator between the parts of `ENV-pppp-nnn`
    pub separator: String,
    pub filter_level: FilterLevel,
    /// Hours before midnight of the visit date still inside the window
    pub window_margin_before_hours: i64,
    /// Hours after midnight of the return date still inside the window
    pub window_margin_after_hours: i64,
    /// Attach the QA ledger and working counts to the result
    pub extended_report: bool,
    pub parser: ParserSettings,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            separator: "-".to_string(),
            filter_level: FilterLevel::Max,
            window_margin_before_hours: 12,
            window_margin_after_hours: 12,
            extended_report: false,
            parser: ParserSettings::default(),
        }
    }
}

impl ConverterConfig {
    /// Load a config from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConvertError> {
        let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
        let config: ConverterConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, ConvertError> {
        let config: ConverterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.separator.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "separator must not be empty".to_string(),
            ));
        }
        for margin in [self.window_margin_before_hours, self.window_margin_after_hours] {
            if !(0..=MAX_WINDOW_MARGIN_HOURS).contains(&margin) {
                return Err(ConvertError::InvalidConfig(format!(
                    "window margins must be between 0 and {} hours",
                    MAX_WINDOW_MARGIN_HOURS
                )));
            }
        }
        if !(1..=MAX_FILENAME_TOLERANCE_SECS).contains(&self.parser.filename_tolerance_secs) {
            return Err(ConvertError::InvalidConfig(format!(
                "filename_tolerance_secs must be between 1 and {}",
                MAX_FILENAME_TOLERANCE_SECS
            )));
        }
        if self.parser.channel_count < 1 {
            return Err(ConvertError::InvalidConfig(
                "channel_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Limits used while reading raw interval files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Longer lines are treated as byte corruption
    pub max_line_length: usize,
    /// Required fields per data row
    pub channel_count: usize,
    /// Files with fewer lines are dropped before parsing
    pub min_file_lines: usize,
    /// Files with fewer data rows are skipped at `ShortFiles` and above
    pub min_rows_per_file: usize,
    /// Allowed distance between the file name and its first timestamp; a
    /// difference equal to the tolerance already fails
    pub filename_tolerance_secs: i64,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            max_line_length: 160,
            channel_count: CHANNEL_COUNT,
            min_file_lines: 4,
            min_rows_per_file: SAMPLES_PER_MINUTE,
            filename_tolerance_secs: 10,
        }
    }
}
