//! Participant visit table
//!
//! Resolves a participant id to the visit window, device assignment, sensor
//! location, and the staff's data-validity flag.

use super::{non_empty, table_reader_builder};
use crate::error::ConvertError;
use crate::state::{ConversionState, IssueCategory, QaCheck, QaOutcome, Stage};
use crate::types::{
    pad_device_id, parse_visit_date, VisitRecord, PLACEHOLDER, SENTINEL_VISIT_KEY,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Earliest plausible visit date for the study
pub const STUDY_START: &str = "2023-07-01";

/// Substituted when a visit date is unusable, so QA can continue
const DEFAULT_VISIT_DATE: &str = "2023-07-02";

/// Time of day assumed for visit-table dates, which carry no time
const VISIT_ANCHOR_HOURS: i64 = 13;

/// Raw visit table row. Accepts the normalized column names and the names
/// used by the study's data-capture export.
#[derive(Debug, Deserialize)]
struct VisitRow {
    #[serde(alias = "studyid", alias = "pid")]
    participant_id: String,
    #[serde(default, alias = "siteid")]
    site: Option<String>,
    #[serde(default, alias = "pacmpdat")]
    visit_date: Option<String>,
    #[serde(default, alias = "dvenvendat")]
    return_date: Option<String>,
    #[serde(default, alias = "visdat", alias = "visit_appt_time")]
    appointment: Option<String>,
    #[serde(default, alias = "dvenvsn", alias = "esID")]
    device_id: Option<String>,
    #[serde(default, alias = "dvenvlocn")]
    location: Option<String>,
    #[serde(default, alias = "dvenvdwnd", alias = "es_data_ok")]
    data_ok: Option<String>,
}

impl VisitRow {
    fn into_record(self) -> VisitRecord {
        let placeholder = || PLACEHOLDER.to_string();
        let visit_date = non_empty(self.visit_date).unwrap_or_else(placeholder);
        let appointment = non_empty(self.appointment).unwrap_or_else(placeholder);
        let dates_agree = dates_agree(&appointment, &visit_date);

        VisitRecord {
            participant_id: self.participant_id.trim().to_string(),
            site: non_empty(self.site).unwrap_or_else(placeholder),
            visit_date,
            return_date: non_empty(self.return_date).unwrap_or_else(placeholder),
            appointment,
            dates_agree,
            device_id: non_empty(self.device_id)
                .map(|d| pad_device_id(&d))
                .unwrap_or_else(placeholder),
            location: non_empty(self.location)
                .map(|l| sanitize_location(&l))
                .unwrap_or_else(placeholder),
            data_ok: non_empty(self.data_ok)
                .map(|d| normalize_data_ok(&d))
                .unwrap_or_else(placeholder),
        }
    }
}

/// `:` separates keys in the export header and tab separates manifest columns
fn sanitize_location(location: &str) -> String {
    location.replace(|c: char| c == ':' || c == '\t', " ")
}

/// Newer exports record the validity flag as 1.0 / 0.0
fn normalize_data_ok(value: &str) -> String {
    match value.trim() {
        "1" | "1.0" => "yes".to_string(),
        "0" | "0.0" => "no".to_string(),
        other => other.to_string(),
    }
}

/// An appointment that is missing or unreadable cannot disagree
fn dates_agree(appointment: &str, visit_date: &str) -> bool {
    match (parse_visit_date(appointment), parse_visit_date(visit_date)) {
        (Some(appt), Some(visit)) => appt == visit,
        _ => true,
    }
}

/// Visit records keyed by participant id. The `0000` sentinel is always present.
#[derive(Debug, Clone)]
pub struct VisitRegistry {
    records: HashMap<String, VisitRecord>,
}

impl Default for VisitRegistry {
    fn default() -> Self {
        Self::sentinel_only()
    }
}

impl VisitRegistry {
    /// A registry holding only the sentinel record
    pub fn sentinel_only() -> Self {
        let mut records = HashMap::new();
        records.insert(SENTINEL_VISIT_KEY.to_string(), VisitRecord::sentinel());
        Self { records }
    }

    /// Build from any CSV source
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConvertError> {
        let mut registry = Self::sentinel_only();
        let mut csv_reader = table_reader_builder().from_reader(reader);
        for row in csv_reader.deserialize::<VisitRow>() {
            let record = row?.into_record();
            if record.participant_id == SENTINEL_VISIT_KEY {
                continue;
            }
            registry
                .records
                .insert(record.participant_id.clone(), record);
        }
        Ok(registry)
    }

    /// Build from a CSV file
    pub fn from_path(path: &Path) -> Result<Self, ConvertError> {
        let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
        let registry = Self::from_reader(file).map_err(|e| match e {
            ConvertError::TableRow(source) => ConvertError::Table {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        tracing::info!(path = %path.display(), records = registry.len(), "visit table loaded");
        Ok(registry)
    }

    /// Load the table if one is given; on failure log and fall back to the
    /// sentinel so conversions can still report on the data.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            None => Self::sentinel_only(),
            Some(path) => Self::from_path(path).unwrap_or_else(|e| {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "unable to build visit table; relying on sentinel record only"
                );
                Self::sentinel_only()
            }),
        }
    }

    pub fn lookup(&self, participant_id: &str) -> Option<&VisitRecord> {
        self.records.get(participant_id)
    }

    pub fn sentinel(&self) -> VisitRecord {
        self.records
            .get(SENTINEL_VISIT_KEY)
            .cloned()
            .unwrap_or_else(VisitRecord::sentinel)
    }

    /// Number of records, including the sentinel
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Resolve the participant's visit record, falling back to the sentinel
pub fn resolve_visit(mut state: ConversionState, registry: &VisitRegistry) -> ConversionState {
    let stage = Stage::VisitRegistry;
    let participant = state.working.participant_from_folder.clone();

    match registry.lookup(&participant).filter(|_| participant != SENTINEL_VISIT_KEY) {
        Some(record) => {
            state.resolved.participant_id = participant;
            state.resolved.location = record.location.clone();
            state.working.visit = record.clone();
            state
                .qa
                .set(QaCheck::ParticipantInVisitTable, QaOutcome::Ok, stage);
        }
        None => {
            state.record_error(
                stage,
                IssueCategory::Reference,
                format!(
                    "Participant ID {} is not in visit table; using default to enable checks.",
                    participant
                ),
            );
            state.working.visit = registry.sentinel();
            state
                .qa
                .set(QaCheck::ParticipantInVisitTable, QaOutcome::NotOk, stage);
        }
    }
    state
}

fn anchored(date: NaiveDate, hours: i64) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::hours(hours)
}

/// Check the resolved visit record: device assignment, validity flag, and the
/// plausibility of the visit and return dates. Unusable dates are replaced so
/// the window filter can still run.
pub fn check_visit(mut state: ConversionState, now: NaiveDateTime) -> ConversionState {
    let stage = Stage::VisitCheck;
    let visit = state.working.visit.clone();

    let device_matches = visit.device_id == state.working.device_from_folder;
    if !device_matches {
        state.record_error(
            stage,
            IssueCategory::Reference,
            format!(
                "EnvSensor ID in folder name {} does not match sensor ID in visit table {}.",
                state.working.device_from_folder, visit.device_id
            ),
        );
    }
    state.qa.set(
        QaCheck::DeviceMatchesVisitRecord,
        QaOutcome::from_passed(device_matches),
        stage,
    );

    let data_valid = visit.data_marked_valid();
    if !data_valid {
        state.record_error(
            stage,
            IssueCategory::Policy,
            format!("Sensor data marked invalid ({}) in visit table.", visit.data_ok),
        );
    }
    state.qa.set(
        QaCheck::SensorDataMarkedValid,
        QaOutcome::from_passed(data_valid),
        stage,
    );

    let visit_date = match parse_visit_date(&visit.visit_date) {
        Some(date) => date,
        None => {
            state.record_error(
                stage,
                IssueCategory::Temporal,
                format!(
                    "Visit date {} not usable. Default to {} to continue QA.",
                    visit.visit_date, DEFAULT_VISIT_DATE
                ),
            );
            state.working.visit.visit_date = DEFAULT_VISIT_DATE.to_string();
            parse_visit_date(DEFAULT_VISIT_DATE).unwrap_or_else(|| now.date())
        }
    };

    // A substituted return date is anchored at midnight so it is never in the future
    let return_dt = match parse_visit_date(&visit.return_date) {
        Some(date) => anchored(date, VISIT_ANCHOR_HOURS),
        None => {
            let today = now.date();
            state.record_error(
                stage,
                IssueCategory::Temporal,
                format!(
                    "Return date {} not usable. Default to today {} to continue QA.",
                    visit.return_date, today
                ),
            );
            state.working.visit.return_date = today.format("%Y-%m-%d").to_string();
            anchored(today, 0)
        }
    };

    let in_order = return_dt.date() >= visit_date;
    if !in_order {
        state.record_error(
            stage,
            IssueCategory::Temporal,
            format!(
                "Return {} is before visit {} in visit table.",
                return_dt.date(),
                visit_date
            ),
        );
    }
    state.qa.set(
        QaCheck::VisitDateBeforeReturnDate,
        QaOutcome::from_passed(in_order),
        stage,
    );

    let not_future = return_dt <= now;
    if !not_future {
        state.record_error(
            stage,
            IssueCategory::Policy,
            format!("Visit table has sensor return {} in the future.", return_dt),
        );
    }
    state.qa.set(
        QaCheck::ReturnDateNotInFuture,
        QaOutcome::from_passed(not_future),
        stage,
    );

    let study_start = parse_visit_date(STUDY_START).unwrap_or(visit_date);
    let in_range = visit_date >= study_start;
    if !in_range {
        state.record_error(
            stage,
            IssueCategory::Temporal,
            format!("Visit table has visit date {} before study start.", visit_date),
        );
    }
    state.qa.set(
        QaCheck::VisitDateInStudyRange,
        QaOutcome::from_passed(in_range),
        stage,
    );

    if !visit.dates_agree {
        state.record_error(
            stage,
            IssueCategory::Temporal,
            format!(
                "Appointment {} and visit date {} disagree in visit table.",
                visit.appointment, visit.visit_date
            ),
        );
    }
    state.qa.set(
        QaCheck::AppointmentAndVisitDatesMatch,
        QaOutcome::from_passed(visit.dates_agree),
        stage,
    );

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterLevel;
    use pretty_assertions::assert_eq;

    const TABLE: &str = "\
participant_id,site,visit_date,return_date,appointment,device_id,location,data_ok
4050,site_02,2023-08-01,2023-08-10,2023-08-01 09:30,52,family room,yes
4051,site_02,2023-08-02,,,53,kitchen: counter,no
4052,site_02,2023-08-03,2023-08-12,2023-08-04,104,bedroom,OK
";

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn state_for(participant: &str, device: &str) -> ConversionState {
        let mut state = ConversionState::new(
            format!("ENV-{}-{}", participant, device),
            "out",
            FilterLevel::Max,
        );
        state.working.participant_from_folder = participant.to_string();
        state.working.device_from_folder = device.to_string();
        state
    }

    #[test]
    fn test_from_reader_normalizes_rows() {
        let registry = VisitRegistry::from_reader(TABLE.as_bytes()).unwrap();
        assert_eq!(registry.len(), 4);

        let record = registry.lookup("4050").unwrap();
        assert_eq!(
            record,
            &VisitRecord {
                participant_id: "4050".to_string(),
                site: "site_02".to_string(),
                visit_date: "2023-08-01".to_string(),
                return_date: "2023-08-10".to_string(),
                appointment: "2023-08-01 09:30".to_string(),
                dates_agree: true,
                device_id: "052".to_string(),
                location: "family room".to_string(),
                data_ok: "yes".to_string(),
            }
        );

        let record = registry.lookup("4051").unwrap();
        assert_eq!(record.return_date, PLACEHOLDER);
        assert_eq!(record.appointment, PLACEHOLDER);
        assert_eq!(record.location, "kitchen  counter");
        assert!(record.dates_agree);

        assert!(!registry.lookup("4052").unwrap().dates_agree);
        assert!(registry.lookup(SENTINEL_VISIT_KEY).is_some());
    }

    #[test]
    fn test_capture_export_aliases() {
        let table = "\
studyid,siteid,visdat,pacmpdat,dvenvendat,dvenvdwnd,dvenvsn,dvenvlocn,extra
7001,site_03,2023-09-01 10:00,2023-09-01,2023-09-11,1.0,7,hallway,ignored
7002,site_03,2023-09-02 10:00,2023-09-02,2023-09-12,0.0,8,den,ignored
";
        let registry = VisitRegistry::from_reader(table.as_bytes()).unwrap();
        let record = registry.lookup("7001").unwrap();
        assert_eq!(record.device_id, "007");
        assert_eq!(record.data_ok, "yes");
        assert!(record.data_marked_valid());
        assert!(!registry.lookup("7002").unwrap().data_marked_valid());
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let registry = VisitRegistry::load_or_default(Some(Path::new("/nonexistent/visits.csv")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.sentinel(), VisitRecord::sentinel());
        assert_eq!(VisitRegistry::load_or_default(None).len(), 1);
    }

    #[test]
    fn test_resolve_known_participant() {
        let registry = VisitRegistry::from_reader(TABLE.as_bytes()).unwrap();
        let state = resolve_visit(state_for("4050", "052"), &registry);
        assert_eq!(state.error_count(), 0);
        assert_eq!(state.resolved.participant_id, "4050");
        assert_eq!(state.resolved.location, "family room");
        assert_eq!(state.qa.outcome(QaCheck::ParticipantInVisitTable), QaOutcome::Ok);
    }

    #[test]
    fn test_resolve_unknown_participant_uses_sentinel() {
        let registry = VisitRegistry::from_reader(TABLE.as_bytes()).unwrap();
        let state = resolve_visit(state_for("9000", "052"), &registry);
        assert_eq!(state.error_count(), 1);
        assert_eq!(state.working.visit, VisitRecord::sentinel());
        assert_eq!(state.resolved.participant_id, "NPID");
        assert_eq!(
            state.qa.outcome(QaCheck::ParticipantInVisitTable),
            QaOutcome::NotOk
        );
    }

    #[test]
    fn test_check_visit_all_pass() {
        let registry = VisitRegistry::from_reader(TABLE.as_bytes()).unwrap();
        let state = resolve_visit(state_for("4050", "052"), &registry);
        let state = check_visit(state, now());
        assert_eq!(state.error_count(), 0, "{:?}", state.issue_messages());
        for check in [
            QaCheck::DeviceMatchesVisitRecord,
            QaCheck::SensorDataMarkedValid,
            QaCheck::VisitDateBeforeReturnDate,
            QaCheck::ReturnDateNotInFuture,
            QaCheck::VisitDateInStudyRange,
            QaCheck::AppointmentAndVisitDatesMatch,
        ] {
            assert_eq!(state.qa.outcome(check), QaOutcome::Ok, "{}", check);
            assert_eq!(state.qa.entry(check).set_by, Some(Stage::VisitCheck));
        }
    }

    #[test]
    fn test_check_visit_flags_policy_and_dates() {
        let registry = VisitRegistry::from_reader(TABLE.as_bytes()).unwrap();
        let state = resolve_visit(state_for("4051", "053"), &registry);
        let state = check_visit(state, now());

        assert_eq!(state.qa.outcome(QaCheck::SensorDataMarkedValid), QaOutcome::NotOk);
        // missing return date is replaced by today and flagged, but not as future
        assert_eq!(state.qa.outcome(QaCheck::ReturnDateNotInFuture), QaOutcome::Ok);
        assert_eq!(state.working.visit.return_date, "2024-01-01");
        assert_eq!(state.error_count(), 2);
    }

    #[test]
    fn test_check_visit_future_and_reversed_dates() {
        let mut state = state_for("4050", "052");
        state.working.visit = VisitRecord {
            visit_date: "2023-08-10".to_string(),
            return_date: "2023-08-01".to_string(),
            device_id: "052".to_string(),
            ..VisitRecord::sentinel()
        };
        let state = check_visit(state, now());
        assert_eq!(
            state.qa.outcome(QaCheck::VisitDateBeforeReturnDate),
            QaOutcome::NotOk
        );

        let mut state = state_for("4050", "052");
        state.working.visit = VisitRecord {
            visit_date: "2023-12-30".to_string(),
            return_date: "2024-01-05".to_string(),
            device_id: "052".to_string(),
            ..VisitRecord::sentinel()
        };
        let state = check_visit(state, now());
        assert_eq!(state.qa.outcome(QaCheck::ReturnDateNotInFuture), QaOutcome::NotOk);
        assert_eq!(state.error_count(), 1);
    }

    #[test]
    fn test_check_visit_before_study_and_mismatches() {
        let registry = VisitRegistry::from_reader(TABLE.as_bytes()).unwrap();
        let state = resolve_visit(state_for("4052", "105"), &registry);
        let state = check_visit(state, now());
        assert_eq!(
            state.qa.outcome(QaCheck::DeviceMatchesVisitRecord),
            QaOutcome::NotOk
        );
        assert_eq!(
            state.qa.outcome(QaCheck::AppointmentAndVisitDatesMatch),
            QaOutcome::NotOk
        );

        let mut state = state_for("4050", "052");
        state.working.visit = VisitRecord {
            visit_date: "2023-06-15".to_string(),
            return_date: "2023-06-25".to_string(),
            device_id: "052".to_string(),
            ..VisitRecord::sentinel()
        };
        let state = check_visit(state, now());
        assert_eq!(state.qa.outcome(QaCheck::VisitDateInStudyRange), QaOutcome::NotOk);
    }

    #[test]
    fn test_unusable_visit_date_is_replaced() {
        let mut state = state_for("4050", "052");
        state.working.visit = VisitRecord {
            visit_date: "soon".to_string(),
            return_date: "2023-08-10".to_string(),
            device_id: "052".to_string(),
            ..VisitRecord::sentinel()
        };
        let state = check_visit(state, now());
        assert_eq!(state.working.visit.visit_date, DEFAULT_VISIT_DATE);
        assert_eq!(state.error_count(), 1);
        assert!(state.issue_messages()[0].contains("not usable"));
    }
}
