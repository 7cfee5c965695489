//! Merge parsed files and check cross-file consistency
//!
//! Files are parsed in file-name order and their rows concatenated. Firmware
//! version, SEN55 serial, and column schema must each be unanimous across the
//! merged files; a disagreement is an error but the first value seen is kept
//! so later stages can still run.

use crate::config::ParserSettings;
use crate::parser::{parse_interval_file, ParseAnomaly, ParsedFile};
use crate::state::{ConversionState, IssueCategory, QaCheck, QaOutcome, Stage};
use crate::types::{DroppedFile, FilterLevel, UNKNOWN};
use crate::window::check_filename_timestamps;

/// Distinct values in first-seen order
fn distinct(values: &[String]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for value in values {
        if !seen.contains(&value.as_str()) {
            seen.push(value.as_str());
        }
    }
    seen
}

/// Resolve one header field across files. Exactly one distinct value passes;
/// none or several is an error, and the first value seen (or `unknown`) is
/// returned either way.
pub fn check_unanimous(
    state: &mut ConversionState,
    field: &str,
    values: &[String],
    check: QaCheck,
) -> String {
    let stage = Stage::Merger;
    let uniques = distinct(values);
    let resolved = uniques.first().copied().unwrap_or(UNKNOWN).to_string();

    if uniques.len() == 1 {
        state.qa.set(check, QaOutcome::Ok, stage);
    } else {
        state.record_error(
            stage,
            IssueCategory::Consistency,
            format!("Expecting exactly one value in {}; found {:?}.", field, uniques),
        );
        state.qa.set(check, QaOutcome::NotOk, stage);
    }
    resolved
}

/// Compare the serial reported by the files with the one expected for the
/// device-assembly id.
pub fn check_serial_match(mut state: ConversionState, file_serial: &str) -> ConversionState {
    let stage = Stage::Merger;
    let matches = state.resolved.serial == file_serial;
    if !matches {
        let expected = state.resolved.serial.clone();
        state.record_error(
            stage,
            IssueCategory::Consistency,
            format!(
                "SEN55 value {} does not match expected value {}",
                file_serial, expected
            ),
        );
    }
    state.qa.set(
        QaCheck::SerialMatchesRegistry,
        QaOutcome::from_passed(matches),
        stage,
    );
    state
}

/// Turn one file's parse anomalies into issues. Skipped lines and truncations
/// are reported one by one, dropped rows as a per-file total.
fn record_anomalies(state: &mut ConversionState, file: &ParsedFile) {
    let stage = Stage::IntervalFileParser;
    let name = file.file_name();
    let mut dropped = 0;

    for anomaly in &file.anomalies {
        match anomaly {
            ParseAnomaly::IncorrectFieldCount { .. } | ParseAnomaly::BadTimestamp { .. } => {
                dropped += 1;
            }
            ParseAnomaly::TimestampRetro { .. } => {
                dropped += 1;
                state.record_warning(
                    stage,
                    IssueCategory::Temporal,
                    format!("{} in {}", anomaly, name),
                );
            }
            ParseAnomaly::ExtremeLineLength { .. } | ParseAnomaly::InvalidUtf8 { .. } => {
                state.record_warning(stage, IssueCategory::Format, format!("{} in {}", anomaly, name));
            }
        }
    }

    if dropped > 0 {
        state.record_warning(
            stage,
            IssueCategory::Format,
            format!("{} malformed rows dropped from {}.", dropped, name),
        );
    }
}

/// Parse every working file, check file names against first rows, merge the
/// rows, and resolve firmware, serial, and schema.
pub fn merge_files(mut state: ConversionState, settings: &ParserSettings) -> ConversionState {
    let files = state.working.files.clone();
    let mut parsed_files = Vec::with_capacity(files.len());

    for path in files {
        match parse_interval_file(&path, settings) {
            Ok(parsed) => {
                record_anomalies(&mut state, &parsed);
                state.working.dropped_row_count += parsed.stats.dropped_rows;
                parsed_files.push(parsed);
            }
            Err(e) => {
                state.record_error(Stage::IntervalFileParser, IssueCategory::Io, e.to_string());
                state.working.dropped_files.push(DroppedFile {
                    path,
                    reason: "unreadable".to_string(),
                });
            }
        }
    }

    state = check_filename_timestamps(state, &parsed_files, settings.filename_tolerance_secs);

    let skip_short = state.resolved.filter_level >= FilterLevel::ShortFiles;
    let mut merged = Vec::with_capacity(parsed_files.len());
    for parsed in parsed_files {
        if skip_short && parsed.rows.len() < settings.min_rows_per_file {
            state.record_info(
                Stage::Merger,
                IssueCategory::Format,
                format!(
                    "File {} has {} data rows, less than one minute; not merged.",
                    parsed.file_name(),
                    parsed.rows.len()
                ),
            );
            state.working.dropped_files.push(DroppedFile {
                path: parsed.path,
                reason: format!("{} data rows", parsed.rows.len()),
            });
            continue;
        }
        merged.push(parsed);
    }
    state.working.files = merged.iter().map(|p| p.path.clone()).collect();

    for parsed in merged {
        state.working.firmware_values.extend(parsed.firmware_versions);
        state.working.serial_values.extend(parsed.serials);
        state.working.schema_values.extend(parsed.schema);
        state.working.rows.extend(parsed.rows);
    }
    state.working.merged_row_count = state.working.rows.len();
    state.resolved.row_count = state.working.rows.len();

    let firmware = state.working.firmware_values.clone();
    state.resolved.firmware_version =
        check_unanimous(&mut state, "firmware version", &firmware, QaCheck::FirmwareUnanimous);

    let serials = state.working.serial_values.clone();
    let file_serial = check_unanimous(&mut state, "SEN55", &serials, QaCheck::SerialUnanimous);

    let schemas = state.working.schema_values.clone();
    state.resolved.column_names =
        check_unanimous(&mut state, "column names", &schemas, QaCheck::SchemaUnanimous);

    tracing::info!(
        participant = %state.working.participant_from_folder,
        files = state.working.files.len(),
        rows = state.working.merged_row_count,
        "files merged"
    );

    check_serial_match(state, &file_serial)
}
