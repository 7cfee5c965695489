//! Device-assembly serial table

use super::{non_empty, table_reader_builder};
use crate::error::ConvertError;
use crate::state::{ConversionState, IssueCategory, QaCheck, QaOutcome, Stage};
use crate::types::{pad_device_id, DeviceRecord, SENTINEL_SERIAL, UNKNOWN};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUNDLED_TABLE: &str = include_str!("../../assets/device_serials.csv");

#[derive(Debug, Deserialize)]
struct DeviceRow {
    #[serde(alias = "esID", alias = "es_id")]
    device_id: String,
    #[serde(alias = "sen55", alias = "SEN55")]
    serial: String,
    #[serde(default)]
    site: Option<String>,
}

/// Serials keyed by 3-character device-assembly id
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    records: HashMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConvertError> {
        let mut records = HashMap::new();
        let mut csv_reader = table_reader_builder().from_reader(reader);
        for row in csv_reader.deserialize::<DeviceRow>() {
            let row = row?;
            let device_id = pad_device_id(&row.device_id);
            records.insert(
                device_id.clone(),
                DeviceRecord {
                    device_id,
                    serial: row.serial.trim().to_string(),
                    site: non_empty(row.site).unwrap_or_else(|| UNKNOWN.to_string()),
                },
            );
        }
        Ok(Self { records })
    }

    pub fn from_path(path: &Path) -> Result<Self, ConvertError> {
        let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
        let registry = Self::from_reader(file).map_err(|e| match e {
            ConvertError::TableRow(source) => ConvertError::Table {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        tracing::info!(path = %path.display(), records = registry.len(), "device table loaded");
        Ok(registry)
    }

    /// The build table shipped with the crate
    pub fn bundled() -> Result<Self, ConvertError> {
        Self::from_reader(BUNDLED_TABLE.as_bytes())
    }

    pub fn lookup(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.records.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Resolve the expected SEN55 serial for the folder's device-assembly id
pub fn resolve_serial(mut state: ConversionState, registry: &DeviceRegistry) -> ConversionState {
    let stage = Stage::DeviceRegistry;
    let device = state.working.device_from_folder.clone();

    match registry.lookup(&device) {
        Some(record) => {
            state.resolved.serial = record.serial.clone();
            state.qa.set(QaCheck::DeviceInSerialTable, QaOutcome::Ok, stage);
        }
        None => {
            state.record_error(
                stage,
                IssueCategory::Reference,
                format!("esID {} not found in sensor table; no SEN55 retrieved.", device),
            );
            state.resolved.serial = SENTINEL_SERIAL.to_string();
            state
                .qa
                .set(QaCheck::DeviceInSerialTable, QaOutcome::NotOk, stage);
        }
    }
    state
}
