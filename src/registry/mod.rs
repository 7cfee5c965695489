//! Reference tables
//!
//! Lookup tables built once from CSV and shared read-only across conversions:
//! the participant visit table and the device-assembly serial table.

mod device;
mod visit;

pub use device::{resolve_serial, DeviceRegistry};
pub use visit::{check_visit, resolve_visit, VisitRegistry, STUDY_START};

use csv::{ReaderBuilder, Trim};

/// CSV reader settings shared by both tables
fn table_reader_builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'));
    builder
}

/// Empty cells become `None`
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
