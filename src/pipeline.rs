//! Pipeline orchestration
//!
//! This module provides the public API for envsensor-flux.
//! It composes the stages from folder-name parsing through export and turns
//! the final [`ConversionState`] into a [`ConversionResult`].

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::exporter::export;
use crate::header::HeaderTemplate;
use crate::identifier::parse_identifiers;
use crate::merger::merge_files;
use crate::registry::{check_visit, resolve_serial, resolve_visit, DeviceRegistry, VisitRegistry};
use crate::state::{ConversionState, Issue, QaLedger, ResolvedMetadata};
use crate::trimmer::{trim_rows, TrimLimits};
use crate::types::{DroppedFile, VisitRecord};
use crate::window::{drop_short_files, filter_by_window, list_candidate_files};
use crate::{CONVERTER_VERSION, PRODUCER_NAME};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Who produced a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
}

/// Working detail attached in extended mode, for debugging a conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedReport {
    pub qa: QaLedger,
    pub resolved: ResolvedMetadata,
    pub visit: VisitRecord,
    pub issues: Vec<Issue>,
    pub error_count: usize,
    pub original_file_count: usize,
    pub merged_file_count: usize,
    pub dropped_files: Vec<DroppedFile>,
    pub merged_row_count: usize,
    pub dropped_row_count: usize,
    pub exported_row_count: usize,
}

/// Outcome of converting one participant folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub run_id: String,
    pub producer: Producer,
    pub computed_at_utc: String,
    pub input_path: PathBuf,
    pub participant_id: String,
    pub success: bool,
    pub output_file: Option<PathBuf>,
    /// Human-readable issues in the order they were found
    pub conversion_issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extended: Option<ExtendedReport>,
}

impl ConversionResult {
    fn from_state(state: ConversionState, extended: bool) -> Self {
        let conversion_issues = state.issue_messages();
        let extended = extended.then(|| ExtendedReport {
            qa: state.qa.clone(),
            resolved: state.resolved.clone(),
            visit: state.working.visit.clone(),
            issues: state.working.issues.clone(),
            error_count: state.working.error_count,
            original_file_count: state.working.original_file_count,
            merged_file_count: state.working.files.len(),
            dropped_files: state.working.dropped_files.clone(),
            merged_row_count: state.working.merged_row_count,
            dropped_row_count: state.working.dropped_row_count,
            exported_row_count: if state.success {
                state.working.rows.len()
            } else {
                0
            },
        });

        Self {
            run_id: Uuid::new_v4().to_string(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: CONVERTER_VERSION.to_string(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            input_path: state.working.input_path,
            participant_id: state.participant_id,
            success: state.success,
            output_file: state.output_file,
            conversion_issues,
            extended,
        }
    }

    /// Encode to JSON string
    pub fn to_json(&self, pretty: bool) -> Result<String, ConvertError> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}

/// Convert one folder with freshly loaded tables.
///
/// # Arguments
/// * `input` - `ENV-pppp-nnn` folder, or a single raw `.csv` file
/// * `output_folder` - Where `{pppp}_ENV.csv` is written on success
/// * `visit_table` - Visit table CSV; the sentinel record is used when absent
///   or unreadable
/// * `device_table` - Device build table CSV; the bundled table when absent
///
/// # Example
/// ```ignore
/// let result = convert_folder(
///     Path::new("ENV-4050-052"),
///     Path::new("out"),
///     Some(Path::new("visits.csv")),
///     None,
///     &ConverterConfig::default(),
/// )?;
/// ```
pub fn convert_folder(
    input: &Path,
    output_folder: &Path,
    visit_table: Option<&Path>,
    device_table: Option<&Path>,
    config: &ConverterConfig,
) -> Result<ConversionResult, ConvertError> {
    let visits = VisitRegistry::load_or_default(visit_table);
    let devices = match device_table {
        Some(path) => DeviceRegistry::from_path(path)?,
        None => DeviceRegistry::bundled()?,
    };
    let processor = EnvSensorProcessor::new(visits, devices, config.clone())?;
    Ok(processor.convert(input, output_folder))
}

/// Processor holding the reference tables for many conversions.
///
/// The tables are read-only after construction, so one processor can be shared
/// across threads converting different folders.
#[derive(Debug, Clone)]
pub struct EnvSensorProcessor {
    visits: VisitRegistry,
    devices: DeviceRegistry,
    template: HeaderTemplate,
    config: ConverterConfig,
    trim_limits: TrimLimits,
}

impl EnvSensorProcessor {
    /// Create a processor with the bundled header template
    pub fn new(
        visits: VisitRegistry,
        devices: DeviceRegistry,
        config: ConverterConfig,
    ) -> Result<Self, ConvertError> {
        config.validate()?;
        Ok(Self {
            visits,
            devices,
            template: HeaderTemplate::bundled()?,
            config,
            trim_limits: TrimLimits::default(),
        })
    }

    /// Replace the header template
    pub fn with_template(mut self, template: HeaderTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn visits(&self) -> &VisitRegistry {
        &self.visits
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Convert one folder, judging return dates against the current UTC time
    pub fn convert(&self, input: &Path, output_folder: &Path) -> ConversionResult {
        self.convert_at(input, output_folder, Utc::now().naive_utc())
    }

    /// Convert one folder as of `now`
    pub fn convert_at(&self, input: &Path, output_folder: &Path, now: NaiveDateTime) -> ConversionResult {
        let span = tracing::info_span!(
            "convert",
            path = %input.display(),
            filter_level = self.config.filter_level.as_u8()
        );
        let _guard = span.enter();

        let state = self.run_stages(input, output_folder, now);
        tracing::info!(
            participant = %state.participant_id,
            success = state.success,
            errors = state.error_count(),
            "conversion finished"
        );
        ConversionResult::from_state(state, self.config.extended_report)
    }

    /// Run every stage in order and return the final state.
    ///
    /// Pipeline stages:
    /// 1. IdentifierParser - participant and device ids from the folder name
    /// 2. VisitRegistry - visit record lookup and plausibility checks
    /// 3. DeviceRegistry - expected SEN55 serial
    /// 4. FileWindowFilter - candidate files inside the visit window
    /// 5. IntervalFileParser + Merger - parse, merge, consistency checks
    /// 6. TemporalTrimmer - remove the visit lead-in
    /// 7. Exporter - write the export if QA passed
    pub fn run_stages(&self, input: &Path, output_folder: &Path, now: NaiveDateTime) -> ConversionState {
        let config = &self.config;
        let state = ConversionState::new(input, output_folder, config.filter_level);

        let state = parse_identifiers(state, &config.separator);
        let state = resolve_visit(state, &self.visits);
        let state = check_visit(state, now);
        let state = resolve_serial(state, &self.devices);
        let state = list_candidate_files(state);
        let state = filter_by_window(state, config);
        let state = drop_short_files(state, &config.parser);
        let state = merge_files(state, &config.parser);
        let state = trim_rows(state, &self.trim_limits);
        export(state, &self.template)
    }
}
