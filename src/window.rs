//! Candidate file discovery and the visit window
//!
//! A sensor keeps recording between participants, so a folder can hold files
//! from bench tests or the previous wearer. Only files named inside the
//! participant's visit window are kept.

use crate::config::{ConverterConfig, ParserSettings, MAX_FILENAME_TOLERANCE_SECS};
use crate::parser::ParsedFile;
use crate::state::{ConversionState, IssueCategory, QaCheck, QaOutcome, Stage};
use crate::types::{parse_filename_timestamp, parse_visit_date, DroppedFile, VisitRecord};
use chrono::{Duration, NaiveDateTime, NaiveTime};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Inclusive time range during which the participant held the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl VisitWindow {
    /// `[visit 00:00 - before, return 00:00 + after]`, or `None` when either
    /// date cannot be read or a bound leaves the representable range.
    pub fn from_visit(visit: &VisitRecord, before_hours: i64, after_hours: i64) -> Option<Self> {
        let visit_date = parse_visit_date(&visit.visit_date)?;
        let return_date = parse_visit_date(&visit.return_date)?;
        let start = visit_date
            .and_time(NaiveTime::MIN)
            .checked_sub_signed(Duration::try_hours(before_hours)?)?;
        let end = return_date
            .and_time(NaiveTime::MIN)
            .checked_add_signed(Duration::try_hours(after_hours)?)?;
        Some(Self { start, end })
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Collect the `*.csv` files of the input folder (or the input itself when it
/// is a single `.csv` file), sorted by name. Names that are not a 14-digit
/// timestamp are set aside with a warning.
pub fn list_candidate_files(mut state: ConversionState) -> ConversionState {
    let stage = Stage::FileWindowFilter;
    let input = state.working.input_path.clone();

    let mut candidates: Vec<PathBuf> = if input.is_file() && is_csv(&input) {
        vec![input.clone()]
    } else {
        let pattern = format!(
            "{}/*.csv",
            glob::Pattern::escape(&input.to_string_lossy())
        );
        match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(|entry| entry.ok()).collect(),
            Err(e) => {
                state.record_error(
                    stage,
                    IssueCategory::Io,
                    format!("Invalid file pattern for {}: {}", input.display(), e),
                );
                Vec::new()
            }
        }
    };
    candidates.sort();
    state.working.original_file_count = candidates.len();

    if candidates.is_empty() {
        state.record_error(
            stage,
            IssueCategory::Io,
            format!("No csv files found in {}.", input.display()),
        );
    }

    let mut files = Vec::with_capacity(candidates.len());
    for path in candidates {
        if parse_filename_timestamp(&file_stem(&path)).is_some() {
            files.push(path);
        } else {
            state.record_warning(
                stage,
                IssueCategory::Format,
                format!("File name {} is not a timestamp; file excluded.", file_name(&path)),
            );
            state.working.dropped_files.push(DroppedFile {
                path,
                reason: "file name is not a timestamp".to_string(),
            });
        }
    }

    tracing::info!(
        path = %input.display(),
        candidates = state.working.original_file_count,
        kept = files.len(),
        "candidate files listed"
    );
    state.working.files = files;
    state
}

/// Exclude files whose name falls outside the visit window. Exclusions are
/// expected and recorded as one informational issue.
pub fn filter_by_window(mut state: ConversionState, config: &ConverterConfig) -> ConversionState {
    let stage = Stage::FileWindowFilter;
    let window = match VisitWindow::from_visit(
        &state.working.visit,
        config.window_margin_before_hours,
        config.window_margin_after_hours,
    ) {
        Some(window) => window,
        None => {
            state.record_error(
                stage,
                IssueCategory::Temporal,
                format!(
                    "Visit window {} - {} cannot be computed; no files filtered.",
                    state.working.visit.visit_date, state.working.visit.return_date
                ),
            );
            return state;
        }
    };

    let (kept, excluded): (Vec<PathBuf>, Vec<PathBuf>) =
        std::mem::take(&mut state.working.files)
            .into_iter()
            .partition(|path| {
                parse_filename_timestamp(&file_stem(path))
                    .map(|ts| window.contains(ts))
                    .unwrap_or(false)
            });

    if !excluded.is_empty() {
        let names: Vec<String> = excluded.iter().map(|p| file_name(p)).collect();
        state.record_info(
            stage,
            IssueCategory::Temporal,
            format!(
                "{} files were outside the observation window {} - {} and removed. {}",
                excluded.len(),
                window.start,
                window.end,
                names.join(",")
            ),
        );
        state
            .working
            .dropped_files
            .extend(excluded.into_iter().map(|path| DroppedFile {
                path,
                reason: "outside observation window".to_string(),
            }));
    }

    state.working.files = kept;
    state
}

/// Why a file cannot be read far enough to be worth parsing
fn short_file_reason(path: &Path, min_lines: usize) -> Option<String> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return Some(format!("unreadable: {}", e)),
    };
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut lines = 0;
    while lines < min_lines {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if std::str::from_utf8(&buf).is_err() {
                    return Some(format!("decode error at line {}", lines + 1));
                }
                lines += 1;
            }
            Err(e) => return Some(format!("read error at line {}: {}", lines + 1, e)),
        }
    }
    if lines < min_lines {
        Some(format!("only {} lines", lines))
    } else {
        None
    }
}

/// Drop files with fewer than `min_file_lines` lines, or that fail to read
/// within them. These drops are informational.
pub fn drop_short_files(mut state: ConversionState, settings: &ParserSettings) -> ConversionState {
    let stage = Stage::FileWindowFilter;
    let files = std::mem::take(&mut state.working.files);
    let mut kept = Vec::with_capacity(files.len());

    for path in files {
        match short_file_reason(&path, settings.min_file_lines) {
            None => kept.push(path),
            Some(reason) => {
                state.record_info(
                    stage,
                    IssueCategory::Format,
                    format!("File {} dropped: {}.", file_name(&path), reason),
                );
                state.working.dropped_files.push(DroppedFile { path, reason });
            }
        }
    }

    state.working.files = kept;
    state
}

/// Compare each file's name with its first row. A file renamed by hand shows
/// up as a gap beyond the tolerance. Files without rows are not checked. The
/// tolerance is clamped to `1..=MAX_FILENAME_TOLERANCE_SECS`.
pub fn check_filename_timestamps(
    mut state: ConversionState,
    parsed: &[ParsedFile],
    tolerance_secs: i64,
) -> ConversionState {
    let stage = Stage::FileWindowFilter;
    let tolerance = Duration::seconds(tolerance_secs.clamp(1, MAX_FILENAME_TOLERANCE_SECS));
    let mut all_ok = true;

    for file in parsed {
        let (named, first) = match (file.filename_timestamp, file.first_timestamp()) {
            (Some(named), Some(first)) => (named, first),
            _ => continue,
        };
        let delta = first - named;
        if delta >= tolerance || delta <= -tolerance {
            all_ok = false;
            state.record_error(
                stage,
                IssueCategory::Temporal,
                format!(
                    "First timestamp {} does not make sense with filename {}",
                    first,
                    file.file_name()
                ),
            );
        }
    }

    state.qa.set(
        QaCheck::FilenamesMatchFirstTimestamps,
        QaOutcome::from_passed(all_ok),
        stage,
    );
    state
}
