//! Export metadata reader
//!
//! Reads the self-documenting header back out of a finished export so the
//! file can be catalogued without loading its rows.

use crate::error::ConvertError;
use crate::header::header_key;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Catalogue entry for one export file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub modality: String,
    pub manufacturer: String,
    pub device: String,
    pub laterality: String,
    pub participant_id: String,
    pub sensor_id: String,
    pub sensor_location: String,
    pub number_of_observations: usize,
    pub sensor_sampling_extent_in_days: f64,
}

fn take(fields: &HashMap<String, String>, key: &str) -> Result<String, ConvertError> {
    fields
        .get(key)
        .cloned()
        .ok_or_else(|| ConvertError::MissingField(key.to_string()))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConvertError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConvertError::HeaderParse(format!("{} is not a number: {}", key, value)))
}

/// Collect `# key: value` lines up to the first line that is not a comment
fn header_fields<I: IntoIterator<Item = String>>(lines: I) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('#') {
            break;
        }
        if let (Some(key), Some((_, value))) = (header_key(line), line.split_once(':')) {
            fields.insert(key.to_string(), value.trim().to_string());
        }
    }
    fields
}

fn from_fields(fields: HashMap<String, String>) -> Result<ExportMetadata, ConvertError> {
    let observations = take(&fields, "meta_number_of_observations")?;
    let extent = take(&fields, "meta_extent_of_observation_in_days")?;
    Ok(ExportMetadata {
        modality: "environmental_sensor".to_string(),
        manufacturer: take(&fields, "environmental_sensor_manufacturer")?,
        device: take(&fields, "environmental_sensor_device_model")?,
        laterality: "none".to_string(),
        participant_id: take(&fields, "meta_participant_id")?,
        sensor_id: take(&fields, "meta_sensor_id")?,
        sensor_location: take(&fields, "meta_sensor_location")?,
        number_of_observations: parse_number("meta_number_of_observations", &observations)?,
        sensor_sampling_extent_in_days: parse_number(
            "meta_extent_of_observation_in_days",
            &extent,
        )?,
    })
}

/// Parse metadata from export text
pub fn parse_export_metadata(text: &str) -> Result<ExportMetadata, ConvertError> {
    from_fields(header_fields(text.lines().map(str::to_string)))
}

/// Read metadata from an export file, stopping at the column line
pub fn read_export_metadata(path: &Path) -> Result<ExportMetadata, ConvertError> {
    let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ConvertError::io(path, e))?;
        let is_header = line.trim_start().starts_with('#') || line.trim().is_empty();
        lines.push(line);
        if !is_header {
            break;
        }
    }
    let metadata = from_fields(header_fields(lines))?;
    tracing::debug!(path = %path.display(), participant = %metadata.participant_id, "export metadata read");
    Ok(metadata)
}
