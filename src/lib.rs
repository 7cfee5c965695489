//! envsensor-flux - Environmental sensor ingestion and QA
//!
//! Converts the raw interval files recorded by a SEN55-based home environmental
//! sensor into one self-documenting export per participant through a linear
//! pipeline: folder-name parsing → visit and device lookup → visit-window file
//! filtering → parsing and merging → lead-in trimming → export.
//!
//! Every stage takes a [`ConversionState`] and hands it back. Problems in the
//! data are recorded as issues and QA outcomes, never raised, so one pass over
//! a folder reports every independent problem it has. The export is written
//! only when no error was recorded and every QA check passed.
//!
//! ## Logging
//!
//! The library emits `tracing` events and never installs a subscriber; the
//! caller decides where they go.

pub mod config;
pub mod error;
pub mod exporter;
pub mod header;
pub mod identifier;
pub mod merger;
pub mod metadata;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod trimmer;
pub mod types;
pub mod window;

pub use config::{ConverterConfig, ParserSettings};
pub use error::ConvertError;
pub use metadata::{parse_export_metadata, read_export_metadata, ExportMetadata};
pub use pipeline::{convert_folder, ConversionResult, EnvSensorProcessor, ExtendedReport};
pub use registry::{DeviceRegistry, VisitRegistry};
pub use state::{ConversionState, Issue, IssueCategory, QaCheck, QaOutcome, Severity, Stage};
pub use types::FilterLevel;

/// Converter version reported in every result
pub const CONVERTER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported in every result
pub const PRODUCER_NAME: &str = "envsensor-flux";
