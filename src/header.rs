//! Self-documenting header
//!
//! The export starts with `# key: value` lines describing the device and the
//! recording. Most lines are fixed text from a template; the participant- and
//! recording-specific keys are filled in per export.

use crate::error::ConvertError;
use crate::state::ResolvedMetadata;
use crate::types::SAMPLES_PER_DAY;
use std::fs;
use std::path::Path;

const BUNDLED_TEMPLATE: &str = include_str!("../assets/header_template.txt");

/// Values substituted into the template
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderValues {
    pub sensor_id: String,
    pub participant_id: String,
    pub location: String,
    pub row_count: usize,
    pub firmware_version: String,
}

impl HeaderValues {
    pub fn from_resolved(resolved: &ResolvedMetadata) -> Self {
        Self {
            sensor_id: resolved.serial.clone(),
            participant_id: resolved.participant_id.clone(),
            location: resolved.location.clone(),
            row_count: resolved.row_count,
            firmware_version: resolved.firmware_version.clone(),
        }
    }

    /// Recording length in days at the native sampling rate, one decimal
    pub fn extent_in_days(&self) -> String {
        format!("{:.1}", self.row_count as f64 / SAMPLES_PER_DAY as f64)
    }

    fn value_for(&self, key: &str) -> Option<String> {
        match key {
            "meta_sensor_id" => Some(self.sensor_id.clone()),
            "meta_participant_id" => Some(self.participant_id.clone()),
            "meta_sensor_location" => Some(self.location.clone()),
            "meta_number_of_observations" => Some(self.row_count.to_string()),
            "meta_extent_of_observation_in_days" => Some(self.extent_in_days()),
            "environmental_sensor_firmware_version" => Some(self.firmware_version.clone()),
            _ => None,
        }
    }
}

/// Key of a `# key: value` line
pub fn header_key(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix('#')?;
    let (key, _) = rest.split_once(':')?;
    Some(key.trim())
}

/// Line-oriented header template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTemplate {
    lines: Vec<String>,
}

impl HeaderTemplate {
    /// Parse template text. Every non-blank line must be a `#` comment so the
    /// header can never be mistaken for data.
    pub fn parse(text: &str) -> Result<Self, ConvertError> {
        let mut lines = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !line.starts_with('#') {
                return Err(ConvertError::HeaderParse(format!(
                    "template line {} does not start with '#': {}",
                    i + 1,
                    line
                )));
            }
            lines.push(line.to_string());
        }
        Ok(Self { lines })
    }

    /// Read a template from disk
    pub fn from_path(path: &Path) -> Result<Self, ConvertError> {
        let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        Self::parse(&text)
    }

    /// The template shipped with the crate
    pub fn bundled() -> Result<Self, ConvertError> {
        Self::parse(BUNDLED_TEMPLATE)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Fill the template. Lines with other keys pass through unchanged.
    pub fn assemble(&self, values: &HeaderValues) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| match header_key(line).and_then(|key| values.value_for(key).map(|v| (key, v))) {
                Some((key, value)) => format!("# {}: {}", key, value),
                None => line.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values() -> HeaderValues {
        HeaderValues {
            sensor_id: "ABCDEF0123456789".to_string(),
            participant_id: "4050".to_string(),
            location: "family room".to_string(),
            row_count: 175_000,
            firmware_version: "1.2.4".to_string(),
        }
    }

    #[test]
    fn test_assemble_replaces_known_keys() {
        let template = HeaderTemplate::parse(
            "# environmental_sensor_manufacturer: custom assembly\n\
             # environmental_sensor_firmware_version: unknown\n\
             # meta_participant_id: unknown\n\
             # meta_sensor_id: unknown\n\
             # meta_sensor_location: unknown\n\
             # meta_number_of_observations: 0\n\
             # meta_extent_of_observation_in_days: 0\n\
             # column_ts: timestamp\n",
        )
        .unwrap();

        assert_eq!(
            template.assemble(&values()),
            vec![
                "# environmental_sensor_manufacturer: custom assembly",
                "# environmental_sensor_firmware_version: 1.2.4",
                "# meta_participant_id: 4050",
                "# meta_sensor_id: ABCDEF0123456789",
                "# meta_sensor_location: family room",
                "# meta_number_of_observations: 175000",
                "# meta_extent_of_observation_in_days: 10.1",
                "# column_ts: timestamp",
            ]
        );
    }

    #[test]
    fn test_extent_rounding() {
        let mut v = values();
        v.row_count = 20;
        assert_eq!(v.extent_in_days(), "0.0");
        v.row_count = SAMPLES_PER_DAY * 3 / 2;
        assert_eq!(v.extent_in_days(), "1.5");
    }

    #[test]
    fn test_bundled_template_carries_every_key() {
        let template = HeaderTemplate::bundled().unwrap();
        assert!(!template.is_empty());
        let keys: Vec<&str> = template.lines.iter().filter_map(|l| header_key(l)).collect();
        for key in [
            "meta_sensor_id",
            "meta_participant_id",
            "meta_sensor_location",
            "meta_number_of_observations",
            "meta_extent_of_observation_in_days",
            "environmental_sensor_firmware_version",
            "environmental_sensor_manufacturer",
            "environmental_sensor_device_model",
        ] {
            assert!(keys.contains(&key), "missing {}", key);
        }
    }

    #[test]
    fn test_template_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.txt");
        std::fs::write(&path, "# study: envsensor\n# meta_participant_id: unknown\n").unwrap();
        let template = HeaderTemplate::from_path(&path).unwrap();
        assert_eq!(
            template.assemble(&values()),
            vec!["# study: envsensor".to_string(), "# meta_participant_id: 4050".to_string()]
        );
        assert!(matches!(
            HeaderTemplate::from_path(&dir.path().join("missing.txt")),
            Err(ConvertError::Io { .. })
        ));
    }

    #[test]
    fn test_rejects_non_comment_lines() {
        assert!(matches!(
            HeaderTemplate::parse("# ok: yes\nts,pm1\n"),
            Err(ConvertError::HeaderParse(_))
        ));
    }

    #[test]
    fn test_header_key() {
        assert_eq!(header_key("# meta_sensor_id: X"), Some("meta_sensor_id"));
        assert_eq!(header_key("; Version: 1.2.4"), None);
        assert_eq!(header_key("# no colon"), None);
    }
}
