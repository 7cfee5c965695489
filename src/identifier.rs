//! Folder-name identifiers
//!
//! Input folders are named `ENV-pppp-nnn`: `pppp` is the participant id and
//! `nnn` the device-assembly id.

use crate::state::{ConversionState, IssueCategory, QaCheck, QaOutcome, Stage};
use crate::types::{SENTINEL_DEVICE, SENTINEL_PARTICIPANT};
use std::path::Path;

const FOLDER_PREFIX: &str = "ENV";

/// Participant ids are 4-digit numbers from 1001 through 9999
pub fn is_valid_participant_id(pid: &str) -> bool {
    if pid.len() != 4 || !pid.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    matches!(pid.parse::<u32>(), Ok(n) if n > 1000 && n <= 9999)
}

/// Device-assembly ids are exactly 3 characters
pub fn is_valid_device_id(device_id: &str) -> bool {
    device_id.chars().count() == 3
}

/// Split a folder name into `(participant, device)`, or `None` when it has too
/// few components.
pub fn split_folder_name<'a>(folder_name: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    let mut parts = folder_name.split(separator);
    let _prefix = parts.next()?;
    let participant = parts.next()?;
    let device = parts.next()?;
    Some((participant, device))
}

/// Extract and validate the participant and device ids from the input folder
/// name. Invalid parts are replaced by sentinels so later stages still run.
pub fn parse_identifiers(mut state: ConversionState, separator: &str) -> ConversionState {
    let stage = Stage::IdentifierParser;
    let input = state.working.input_path.clone();
    let folder_name = folder_basename(&input);

    if !folder_name.starts_with(FOLDER_PREFIX) {
        tracing::info!(folder = %folder_name, "folder name does not start with {}", FOLDER_PREFIX);
    }

    let mut participant_ok = true;
    let mut device_ok = true;
    let (mut participant, mut device) = match split_folder_name(&folder_name, separator) {
        Some((p, d)) => (p.to_string(), d.to_string()),
        None => {
            state.record_error(
                stage,
                IssueCategory::Format,
                format!(
                    "Insufficient components in folder name {}. Expected ENV{sep}pppp{sep}nnn.",
                    folder_name,
                    sep = separator
                ),
            );
            participant_ok = false;
            device_ok = false;
            (SENTINEL_PARTICIPANT.to_string(), SENTINEL_DEVICE.to_string())
        }
    };

    if participant_ok && !is_valid_participant_id(&participant) {
        state.record_error(
            stage,
            IssueCategory::Format,
            format!(
                "Invalid participant ID {}; using {} placeholder.",
                participant, SENTINEL_PARTICIPANT
            ),
        );
        participant = SENTINEL_PARTICIPANT.to_string();
        participant_ok = false;
    }

    if device_ok && !is_valid_device_id(&device) {
        state.record_error(
            stage,
            IssueCategory::Format,
            format!(
                "Invalid sensor ID {}; using {} placeholder.",
                device, SENTINEL_DEVICE
            ),
        );
        device = SENTINEL_DEVICE.to_string();
        device_ok = false;
    }

    state.qa.set(
        QaCheck::ParticipantIdWellFormatted,
        QaOutcome::from_passed(participant_ok),
        stage,
    );
    state.qa.set(
        QaCheck::DeviceIdWellFormatted,
        QaOutcome::from_passed(device_ok),
        stage,
    );

    state.working.participant_from_folder = participant;
    state.working.device_from_folder = device;
    state
}

fn folder_basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterLevel;

    fn run(folder: &str, separator: &str) -> ConversionState {
        let state = ConversionState::new(folder, "out", FilterLevel::Max);
        parse_identifiers(state, separator)
    }

    #[test]
    fn test_well_formed_folder() {
        let state = run("/data/ENV-4050-052", "-");
        assert_eq!(state.working.participant_from_folder, "4050");
        assert_eq!(state.working.device_from_folder, "052");
        assert_eq!(state.error_count(), 0);
        assert_eq!(state.qa.outcome(QaCheck::ParticipantIdWellFormatted), QaOutcome::Ok);
        assert_eq!(state.qa.outcome(QaCheck::DeviceIdWellFormatted), QaOutcome::Ok);
        assert_eq!(
            state.qa.entry(QaCheck::DeviceIdWellFormatted).set_by,
            Some(Stage::IdentifierParser)
        );
    }

    #[test]
    fn test_ids_pass_through_unchanged_across_range() {
        for pid in [1001, 1234, 5000, 9999] {
            for device in ["001", "052", "abc", "300"] {
                let state = run(&format!("ENV-{}-{}", pid, device), "-");
                assert_eq!(state.working.participant_from_folder, pid.to_string());
                assert_eq!(state.working.device_from_folder, device);
                assert_eq!(state.error_count(), 0);
            }
        }
    }

    #[test]
    fn test_malformed_folder_uses_sentinels() {
        let state = run("ENV-99-X", "-");
        assert_eq!(state.working.participant_from_folder, SENTINEL_PARTICIPANT);
        assert_eq!(state.working.device_from_folder, SENTINEL_DEVICE);
        assert_eq!(state.error_count(), 2);
        assert_eq!(state.qa.outcome(QaCheck::ParticipantIdWellFormatted), QaOutcome::NotOk);
        assert_eq!(state.qa.outcome(QaCheck::DeviceIdWellFormatted), QaOutcome::NotOk);
    }

    #[test]
    fn test_too_few_components() {
        let state = run("ENV4050052", "-");
        assert_eq!(state.working.participant_from_folder, SENTINEL_PARTICIPANT);
        assert_eq!(state.working.device_from_folder, SENTINEL_DEVICE);
        assert_eq!(state.error_count(), 1);
        assert!(state.issue_messages()[0].contains("Insufficient components"));
    }

    #[test]
    fn test_custom_separator() {
        let state = run("ENV_4050_052", "_");
        assert_eq!(state.working.participant_from_folder, "4050");
        assert_eq!(state.working.device_from_folder, "052");

        let state = run("ENV_4050_052", "-");
        assert_eq!(state.working.participant_from_folder, SENTINEL_PARTICIPANT);
    }

    #[test]
    fn test_participant_bounds() {
        assert!(!is_valid_participant_id("1000"));
        assert!(is_valid_participant_id("1001"));
        assert!(is_valid_participant_id("9999"));
        assert!(!is_valid_participant_id("10000"));
        assert!(!is_valid_participant_id("0999"));
        assert!(!is_valid_participant_id("NPID"));
        assert!(!is_valid_participant_id("40a0"));
        assert!(!is_valid_participant_id("+405"));
    }

    #[test]
    fn test_device_length() {
        assert!(is_valid_device_id("052"));
        assert!(!is_valid_device_id("52"));
        assert!(!is_valid_device_id("0520"));
        assert!(!is_valid_device_id(""));
    }
}
