//! Raw interval file parser
//!
//! One sensor file holds `;` header lines, a `ts,...` column line, and
//! comma-separated data rows sampled every 5 seconds. Files written while the
//! SD card was failing can carry corrupted bytes, so lines are decoded one at
//! a time and problems are collected as [`ParseAnomaly`] values rather than
//! aborting the parse.

use crate::config::ParserSettings;
use crate::error::ConvertError;
use crate::types::{parse_filename_timestamp, parse_row_timestamp, row_timestamp};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Something unusual found while parsing one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseAnomaly {
    /// Line longer than the corruption threshold; skipped
    ExtremeLineLength { line: usize, length: usize },
    /// Data row with the wrong number of fields; dropped
    IncorrectFieldCount { line: usize, fields: usize },
    /// Data row whose first field is not a timestamp; dropped
    BadTimestamp { line: usize },
    /// Bytes that are not UTF-8; the rest of the file is discarded
    InvalidUtf8 { line: usize },
    /// Timestamp not after the previous kept row; the rest of the file is discarded
    TimestampRetro {
        line: usize,
        previous: NaiveDateTime,
        found: NaiveDateTime,
    },
}

impl ParseAnomaly {
    /// Whether this anomaly ended the parse early
    pub fn truncates(&self) -> bool {
        matches!(
            self,
            ParseAnomaly::InvalidUtf8 { .. } | ParseAnomaly::TimestampRetro { .. }
        )
    }
}

impl fmt::Display for ParseAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAnomaly::ExtremeLineLength { line, length } => {
                write!(f, "extreme line length {} at line {}, omitting bad line", length, line)
            }
            ParseAnomaly::IncorrectFieldCount { line, fields } => {
                write!(f, "incorrect field count {} at line {}, omitting bad line", fields, line)
            }
            ParseAnomaly::BadTimestamp { line } => {
                write!(f, "unreadable timestamp at line {}, omitting bad line", line)
            }
            ParseAnomaly::InvalidUtf8 { line } => {
                write!(f, "undecodable bytes at line {}, omitting remainder of file", line)
            }
            ParseAnomaly::TimestampRetro {
                line,
                previous,
                found,
            } => write!(
                f,
                "timestamp {} at line {} is not after {}, omitting remainder of file",
                found, line, previous
            ),
        }
    }
}

/// Line and row counts for one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Non-empty lines examined before the parse stopped
    pub lines_read: usize,
    pub header_lines: usize,
    /// Lines that were neither header, column line, nor corrupt
    pub candidate_rows: usize,
    pub kept_rows: usize,
    pub dropped_rows: usize,
    pub corrupt_lines: usize,
    pub truncated: bool,
}

/// Everything extracted from one interval file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub path: PathBuf,
    /// Timestamp encoded in the file name, if the name is well formed
    pub filename_timestamp: Option<NaiveDateTime>,
    /// Header lines as written, without line endings
    pub header_lines: Vec<String>,
    /// `Version:` values, in file order
    pub firmware_versions: Vec<String>,
    /// `SEN55` values, in file order
    pub serials: Vec<String>,
    /// Column line with surrounding quotes removed
    pub schema: Option<String>,
    /// Surviving data rows, strictly increasing in time
    pub rows: Vec<String>,
    pub stats: ParseStats,
    pub anomalies: Vec<ParseAnomaly>,
}

impl ParsedFile {
    fn empty(path: &Path) -> Self {
        let filename_timestamp = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(parse_filename_timestamp);
        Self {
            path: path.to_path_buf(),
            filename_timestamp,
            header_lines: Vec::new(),
            firmware_versions: Vec::new(),
            serials: Vec::new(),
            schema: None,
            rows: Vec::new(),
            stats: ParseStats::default(),
            anomalies: Vec::new(),
        }
    }

    /// Timestamp of the first kept row
    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.first().and_then(|row| row_timestamp(row))
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// How a single line is classified
enum LineKind<'a> {
    Header(&'a str),
    Schema(&'a str),
    Candidate(&'a str),
}

fn classify(line: &str) -> LineKind<'_> {
    if line.starts_with(';') || line.starts_with('#') {
        LineKind::Header(line)
    } else if line.trim_start_matches('\'').starts_with("ts") {
        LineKind::Schema(line)
    } else {
        LineKind::Candidate(line)
    }
}

/// Pull `Version:` and `SEN55` values out of a header line such as
/// `; Version: 1.2.4` or `; SEN55 ABCDEF0123456789`.
fn capture_header_tokens(line: &str, parsed: &mut ParsedFile) {
    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "Version:" => {
                if let Some(value) = tokens.next() {
                    parsed.firmware_versions.push(value.to_string());
                }
            }
            "SEN55" => {
                if let Some(value) = tokens.next() {
                    parsed.serials.push(value.to_string());
                }
            }
            _ => {}
        }
    }
}

/// Parse file contents already in memory. `path` only names the result.
pub fn parse_interval_bytes(path: &Path, bytes: &[u8], settings: &ParserSettings) -> ParsedFile {
    let mut parsed = ParsedFile::empty(path);
    let mut previous: Option<NaiveDateTime> = None;

    for (index, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        let line_number = index + 1;
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(_) => {
                parsed.anomalies.push(ParseAnomaly::InvalidUtf8 { line: line_number });
                parsed.stats.truncated = true;
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        parsed.stats.lines_read += 1;

        if line.len() > settings.max_line_length {
            parsed.stats.corrupt_lines += 1;
            parsed.anomalies.push(ParseAnomaly::ExtremeLineLength {
                line: line_number,
                length: line.len(),
            });
            continue;
        }

        match classify(line) {
            LineKind::Header(line) => {
                parsed.stats.header_lines += 1;
                capture_header_tokens(line, &mut parsed);
                parsed.header_lines.push(line.to_string());
            }
            LineKind::Schema(line) => {
                if parsed.schema.is_none() {
                    parsed.schema = Some(line.trim_matches('\'').to_string());
                }
            }
            LineKind::Candidate(line) => {
                parsed.stats.candidate_rows += 1;

                let fields = line.split(',').count();
                if fields != settings.channel_count {
                    parsed.stats.dropped_rows += 1;
                    parsed.anomalies.push(ParseAnomaly::IncorrectFieldCount {
                        line: line_number,
                        fields,
                    });
                    continue;
                }

                let timestamp = match line.split(',').next().and_then(parse_row_timestamp) {
                    Some(ts) => ts,
                    None => {
                        parsed.stats.dropped_rows += 1;
                        parsed
                            .anomalies
                            .push(ParseAnomaly::BadTimestamp { line: line_number });
                        continue;
                    }
                };

                if let Some(prev) = previous {
                    if timestamp <= prev {
                        parsed.stats.dropped_rows += 1;
                        parsed.stats.truncated = true;
                        parsed.anomalies.push(ParseAnomaly::TimestampRetro {
                            line: line_number,
                            previous: prev,
                            found: timestamp,
                        });
                        break;
                    }
                }

                previous = Some(timestamp);
                parsed.stats.kept_rows += 1;
                parsed.rows.push(line.to_string());
            }
        }
    }

    debug_assert_eq!(
        parsed.stats.candidate_rows,
        parsed.stats.kept_rows + parsed.stats.dropped_rows
    );
    parsed
}

/// Read and parse one interval file
pub fn parse_interval_file(path: &Path, settings: &ParserSettings) -> Result<ParsedFile, ConvertError> {
    let bytes = std::fs::read(path).map_err(|e| ConvertError::io(path, e))?;
    let parsed = parse_interval_bytes(path, &bytes, settings);
    tracing::debug!(
        path = %path.display(),
        kept = parsed.stats.kept_rows,
        dropped = parsed.stats.dropped_rows,
        truncated = parsed.stats.truncated,
        "interval file parsed"
    );
    Ok(parsed)
}
