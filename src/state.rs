//! Conversion state threaded through every stage
//!
//! A [`ConversionState`] is created once per input folder. Each stage takes it
//! by value and hands it back, recording problems as [`Issue`]s and QA outcomes
//! in the [`QaLedger`] instead of returning early.

use crate::types::{
    DroppedFile, FilterLevel, VisitRecord, SENTINEL_DEVICE, SENTINEL_PARTICIPANT,
    SENTINEL_SERIAL, UNKNOWN,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Pipeline stage, used as provenance for issues and QA outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IdentifierParser,
    VisitRegistry,
    VisitCheck,
    DeviceRegistry,
    FileWindowFilter,
    IntervalFileParser,
    Merger,
    TemporalTrimmer,
    Exporter,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::IdentifierParser => "identifier_parser",
            Stage::VisitRegistry => "visit_registry",
            Stage::VisitCheck => "visit_check",
            Stage::DeviceRegistry => "device_registry",
            Stage::FileWindowFilter => "file_window_filter",
            Stage::IntervalFileParser => "interval_file_parser",
            Stage::Merger => "merger",
            Stage::TemporalTrimmer => "temporal_trimmer",
            Stage::Exporter => "exporter",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious an issue is. Only errors block the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Broad class of a recorded issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Malformed folder name, row, or header
    Format,
    /// Id missing from its registry
    Reference,
    /// Header values disagree across files or with the registry
    Consistency,
    /// Dates or timestamps out of order or out of range
    Temporal,
    /// Visit table forbids using the data
    Policy,
    /// File system failure
    Io,
}

/// One recorded problem or note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "{}", self.message),
            Severity::Warning => write!(f, "WARNING: {}", self.message),
            Severity::Info => write!(f, "INFO: {}", self.message),
        }
    }
}

/// Named QA checks that gate the export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaCheck {
    ParticipantIdWellFormatted,
    DeviceIdWellFormatted,
    ParticipantInVisitTable,
    DeviceInSerialTable,
    DeviceMatchesVisitRecord,
    VisitDateInStudyRange,
    VisitDateBeforeReturnDate,
    ReturnDateNotInFuture,
    SensorDataMarkedValid,
    AppointmentAndVisitDatesMatch,
    SerialUnanimous,
    SerialMatchesRegistry,
    FirmwareUnanimous,
    SchemaUnanimous,
    FilenamesMatchFirstTimestamps,
}

impl QaCheck {
    pub const ALL: [QaCheck; 15] = [
        QaCheck::ParticipantIdWellFormatted,
        QaCheck::DeviceIdWellFormatted,
        QaCheck::ParticipantInVisitTable,
        QaCheck::DeviceInSerialTable,
        QaCheck::DeviceMatchesVisitRecord,
        QaCheck::VisitDateInStudyRange,
        QaCheck::VisitDateBeforeReturnDate,
        QaCheck::ReturnDateNotInFuture,
        QaCheck::SensorDataMarkedValid,
        QaCheck::AppointmentAndVisitDatesMatch,
        QaCheck::SerialUnanimous,
        QaCheck::SerialMatchesRegistry,
        QaCheck::FirmwareUnanimous,
        QaCheck::SchemaUnanimous,
        QaCheck::FilenamesMatchFirstTimestamps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QaCheck::ParticipantIdWellFormatted => "participant_id_well_formatted",
            QaCheck::DeviceIdWellFormatted => "device_id_well_formatted",
            QaCheck::ParticipantInVisitTable => "participant_in_visit_table",
            QaCheck::DeviceInSerialTable => "device_in_serial_table",
            QaCheck::DeviceMatchesVisitRecord => "device_matches_visit_record",
            QaCheck::VisitDateInStudyRange => "visit_date_in_study_range",
            QaCheck::VisitDateBeforeReturnDate => "visit_date_before_return_date",
            QaCheck::ReturnDateNotInFuture => "return_date_not_in_future",
            QaCheck::SensorDataMarkedValid => "sensor_data_marked_valid",
            QaCheck::AppointmentAndVisitDatesMatch => "appointment_and_visit_dates_match",
            QaCheck::SerialUnanimous => "serial_unanimous",
            QaCheck::SerialMatchesRegistry => "serial_matches_registry",
            QaCheck::FirmwareUnanimous => "firmware_unanimous",
            QaCheck::SchemaUnanimous => "schema_unanimous",
            QaCheck::FilenamesMatchFirstTimestamps => "filenames_match_first_timestamps",
        }
    }
}

impl fmt::Display for QaCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state result of a QA check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaOutcome {
    Ok,
    NotOk,
    Pending,
}

impl QaOutcome {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            QaOutcome::Ok
        } else {
            QaOutcome::NotOk
        }
    }
}

/// Outcome of one check plus the stage that set it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaEntry {
    pub outcome: QaOutcome,
    pub set_by: Option<Stage>,
}

impl Default for QaEntry {
    fn default() -> Self {
        Self {
            outcome: QaOutcome::Pending,
            set_by: None,
        }
    }
}

/// The fixed set of QA checks and their outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaLedger {
    entries: BTreeMap<QaCheck, QaEntry>,
}

impl Default for QaLedger {
    fn default() -> Self {
        Self {
            entries: QaCheck::ALL
                .iter()
                .map(|check| (*check, QaEntry::default()))
                .collect(),
        }
    }
}

impl QaLedger {
    /// Record the outcome of a check and the stage that evaluated it
    pub fn set(&mut self, check: QaCheck, outcome: QaOutcome, set_by: Stage) {
        self.entries.insert(
            check,
            QaEntry {
                outcome,
                set_by: Some(set_by),
            },
        );
    }

    pub fn entry(&self, check: QaCheck) -> QaEntry {
        self.entries.get(&check).copied().unwrap_or_default()
    }

    pub fn outcome(&self, check: QaCheck) -> QaOutcome {
        self.entry(check).outcome
    }

    /// True when every check has been evaluated and passed
    pub fn all_ok(&self) -> bool {
        self.entries.values().all(|e| e.outcome == QaOutcome::Ok)
    }

    /// Checks that are not `Ok`, in ledger order
    pub fn failed_checks(&self) -> Vec<QaCheck> {
        self.entries
            .iter()
            .filter(|(_, e)| e.outcome != QaOutcome::Ok)
            .map(|(check, _)| *check)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QaCheck, &QaEntry)> {
        self.entries.iter()
    }
}

/// Scratch data the stages build up and consume
#[derive(Debug, Clone, Default)]
pub struct WorkingData {
    pub input_path: PathBuf,
    pub output_folder: PathBuf,
    /// Where the export will be written if QA passes
    pub output_path: PathBuf,
    /// Participant id taken from the folder name (validated or sentinel)
    pub participant_from_folder: String,
    /// Device-assembly id taken from the folder name (validated or sentinel)
    pub device_from_folder: String,
    /// Visit record in use; the sentinel when the participant is unknown
    pub visit: VisitRecord,
    /// Files still in play, in ascending name order
    pub files: Vec<PathBuf>,
    pub dropped_files: Vec<DroppedFile>,
    pub original_file_count: usize,
    /// Header values per merged file, in merge order
    pub firmware_values: Vec<String>,
    pub serial_values: Vec<String>,
    pub schema_values: Vec<String>,
    /// Merged data rows, chronological
    pub rows: Vec<String>,
    /// Row count straight after the merge, before trimming
    pub merged_row_count: usize,
    /// Candidate rows dropped for a bad field count or timestamp
    pub dropped_row_count: usize,
    pub issues: Vec<Issue>,
    pub error_count: usize,
}

/// Values resolved for the export header and the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMetadata {
    /// Serial expected from the device table
    pub serial: String,
    pub participant_id: String,
    pub firmware_version: String,
    pub column_names: String,
    pub location: String,
    pub row_count: usize,
    pub filter_level: FilterLevel,
}

impl ResolvedMetadata {
    fn new(filter_level: FilterLevel) -> Self {
        Self {
            serial: SENTINEL_SERIAL.to_string(),
            participant_id: SENTINEL_PARTICIPANT.to_string(),
            firmware_version: UNKNOWN.to_string(),
            column_names: UNKNOWN.to_string(),
            location: UNKNOWN.to_string(),
            row_count: 0,
            filter_level,
        }
    }
}

/// The single aggregate threaded through all stages
#[derive(Debug, Clone)]
pub struct ConversionState {
    pub working: WorkingData,
    pub resolved: ResolvedMetadata,
    pub qa: QaLedger,
    pub participant_id: String,
    pub output_file: Option<PathBuf>,
    pub success: bool,
}

impl ConversionState {
    /// Fresh state for one input folder. Defaults let every stage run even when
    /// an earlier one could not resolve its values.
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_folder: impl Into<PathBuf>,
        filter_level: FilterLevel,
    ) -> Self {
        Self {
            working: WorkingData {
                input_path: input_path.into(),
                output_folder: output_folder.into(),
                participant_from_folder: SENTINEL_PARTICIPANT.to_string(),
                device_from_folder: SENTINEL_DEVICE.to_string(),
                ..Default::default()
            },
            resolved: ResolvedMetadata::new(filter_level),
            qa: QaLedger::default(),
            participant_id: SENTINEL_PARTICIPANT.to_string(),
            output_file: None,
            success: false,
        }
    }

    /// Record an error. Errors are counted and block the export.
    pub fn record_error(&mut self, stage: Stage, category: IssueCategory, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(stage = %stage, category = ?category, "{}", message);
        self.working.error_count += 1;
        self.push_issue(Severity::Error, category, stage, message);
    }

    /// Record something unusual that does not block the export
    pub fn record_warning(
        &mut self,
        stage: Stage,
        category: IssueCategory,
        message: impl Into<String>,
    ) {
        let message = message.into();
        tracing::warn!(stage = %stage, category = ?category, "{}", message);
        self.push_issue(Severity::Warning, category, stage, message);
    }

    /// Record an expected, tolerated event (e.g. a stray file excluded)
    pub fn record_info(&mut self, stage: Stage, category: IssueCategory, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(stage = %stage, category = ?category, "{}", message);
        self.push_issue(Severity::Info, category, stage, message);
    }

    fn push_issue(&mut self, severity: Severity, category: IssueCategory, stage: Stage, message: String) {
        self.working.issues.push(Issue {
            severity,
            category,
            stage,
            message,
        });
    }

    pub fn error_count(&self) -> usize {
        self.working.error_count
    }

    pub fn issues(&self) -> &[Issue] {
        &self.working.issues
    }

    /// Human-readable issue list, in the order recorded
    pub fn issue_messages(&self) -> Vec<String> {
        self.working.issues.iter().map(|i| i.to_string()).collect()
    }

    /// Whether the accumulated state allows an export
    pub fn export_allowed(&self) -> bool {
        self.working.error_count == 0 && self.qa.all_ok()
    }
}
