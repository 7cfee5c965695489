//! Final export
//!
//! Writes `{participant}_ENV.csv` only when the conversion is error-free and
//! every QA check passed. The file is written under a temporary name and
//! renamed, so a failed write never leaves a partial export behind.

use crate::header::{HeaderTemplate, HeaderValues};
use crate::state::{ConversionState, IssueCategory, Stage};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Export file name for a participant
pub fn output_file_name(participant_id: &str) -> String {
    format!("{}_ENV.csv", participant_id)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn write_lines(path: &Path, header: &[String], schema: &str, rows: &[String]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for line in header {
        writeln!(writer, "{}", line)?;
    }
    writeln!(writer, "{}", schema)?;
    for row in rows {
        writeln!(writer, "{}", row)?;
    }
    writer.flush()
}

fn write_export(path: &Path, header: &[String], schema: &str, rows: &[String]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(path);
    let result = write_lines(&partial, header, schema, rows).and_then(|_| fs::rename(&partial, path));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

/// Close the QA ledger and write the export if nothing failed
pub fn export(mut state: ConversionState, template: &HeaderTemplate) -> ConversionState {
    let stage = Stage::Exporter;
    let participant = state.working.participant_from_folder.clone();
    let output_path = state.working.output_folder.join(output_file_name(&participant));
    state.working.output_path = output_path.clone();
    state.participant_id = participant;

    let failed = state.qa.failed_checks();
    if !failed.is_empty() {
        let listed: Vec<String> = failed.iter().map(|c| format!("{} not ok.", c)).collect();
        state.record_error(
            stage,
            IssueCategory::Policy,
            format!("QA failed checks include: {}", listed.join(" ")),
        );
    }

    if !state.export_allowed() {
        tracing::error!(
            path = %state.working.input_path.display(),
            errors = state.error_count(),
            "skipping final export"
        );
        state.success = false;
        state.output_file = None;
        return state;
    }

    let header = template.assemble(&HeaderValues::from_resolved(&state.resolved));
    match write_export(
        &output_path,
        &header,
        &state.resolved.column_names,
        &state.working.rows,
    ) {
        Ok(()) => {
            tracing::info!(
                path = %output_path.display(),
                rows = state.working.rows.len(),
                "export written"
            );
            state.success = true;
            state.output_file = Some(output_path);
        }
        Err(e) => {
            state.record_error(
                stage,
                IssueCategory::Io,
                format!("Problem {} writing the output file {}", e, output_path.display()),
            );
            state.success = false;
            state.output_file = None;
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::{row, SCHEMA};
    use crate::state::{QaCheck, QaOutcome};
    use crate::types::FilterLevel;
    use pretty_assertions::assert_eq;

    fn passing_state(output: &Path) -> ConversionState {
        let mut state = ConversionState::new("ENV-4050-052", output, FilterLevel::Max);
        state.working.participant_from_folder = "4050".to_string();
        state.resolved.participant_id = "4050".to_string();
        state.resolved.serial = "ABCDEF0123456789".to_string();
        state.resolved.firmware_version = "1.2.4".to_string();
        state.resolved.location = "family room".to_string();
        state.resolved.column_names = SCHEMA.to_string();
        state.working.rows = vec![row("2023-08-01 12:00:00"), row("2023-08-01 12:00:05")];
        state.resolved.row_count = 2;
        for check in QaCheck::ALL {
            state.qa.set(check, QaOutcome::Ok, Stage::Merger);
        }
        state
    }

    #[test]
    fn test_export_writes_header_schema_rows() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let template = HeaderTemplate::parse("# meta_participant_id: unknown\n# fixed: line\n").unwrap();

        let state = passing_state(&out);
        assert!(state.export_allowed());
        let state = export(state, &template);
        assert!(state.success);
        assert_eq!(state.participant_id, "4050");
        let path = state.output_file.clone().unwrap();
        assert_eq!(path, out.join("4050_ENV.csv"));

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# meta_participant_id: 4050");
        assert_eq!(lines[1], "# fixed: line");
        assert_eq!(lines[2], SCHEMA);
        assert_eq!(lines.len(), 5);
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_failed_check_blocks_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = passing_state(dir.path());
        state
            .qa
            .set(QaCheck::FirmwareUnanimous, QaOutcome::NotOk, Stage::Merger);

        let state = export(state, &HeaderTemplate::bundled().unwrap());
        assert!(!state.success);
        assert!(state.output_file.is_none());
        assert!(!dir.path().join("4050_ENV.csv").exists());
        assert_eq!(
            state.issue_messages(),
            vec!["QA failed checks include: firmware_unanimous not ok.".to_string()]
        );
    }

    #[test]
    fn test_pending_check_blocks_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ConversionState::new("ENV-4050-052", dir.path(), FilterLevel::Max);
        state.working.participant_from_folder = "4050".to_string();
        let state = export(state, &HeaderTemplate::bundled().unwrap());
        assert!(!state.success);
        assert!(!state.export_allowed());
        assert_eq!(state.error_count(), 1);
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_prior_errors_block_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = passing_state(dir.path());
        state.record_error(Stage::VisitCheck, IssueCategory::Policy, "data marked invalid");
        let state = export(state, &HeaderTemplate::bundled().unwrap());
        assert!(!state.success);
        assert!(!dir.path().join("4050_ENV.csv").exists());
    }

    #[test]
    fn test_write_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the output folder should be
        let blocker = dir.path().join("out");
        fs::write(&blocker, "not a folder").unwrap();

        let state = export(passing_state(&blocker), &HeaderTemplate::bundled().unwrap());
        assert!(!state.success);
        assert!(state.output_file.is_none());
        assert_eq!(state.error_count(), 1);
        assert!(state.issue_messages()[0].starts_with("Problem"));
    }
}
