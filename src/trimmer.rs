//! Lead-in trimming
//!
//! Devices are switched on at the study visit to show the participant how
//! they work, then switched off until the participant sets them up at home.
//! That leaves a short cluster of rows followed by a gap at the start of the
//! record. The trimmer removes such clusters within tight bounds so that real
//! data is never cut.

use crate::state::{ConversionState, IssueCategory, Stage};
use crate::types::{row_timestamp, FilterLevel, SAMPLES_PER_MINUTE};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Bounds on what the trimmer may remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimLimits {
    /// A gap longer than this ends a lead-in cluster
    pub min_gap_secs: i64,
    /// Rows scanned for a gap before giving up (20 minutes of samples)
    pub scan_limit_rows: usize,
    /// Total rows that may be removed (30 minutes of samples)
    pub max_removal_rows: usize,
    /// No further cut once the first row is this far past the original first row
    pub max_removal_span_secs: i64,
}

impl Default for TrimLimits {
    fn default() -> Self {
        Self {
            min_gap_secs: 30,
            scan_limit_rows: SAMPLES_PER_MINUTE * 20,
            max_removal_rows: SAMPLES_PER_MINUTE * 30,
            max_removal_span_secs: 59 * 60 + 59,
        }
    }
}

/// Cuts applied to a row sequence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimOutcome {
    /// Rows removed by each cut, in order
    pub cuts: Vec<usize>,
}

impl TrimOutcome {
    pub fn removed(&self) -> usize {
        self.cuts.iter().sum()
    }
}

/// Index of the first row that follows a gap longer than `min_gap_secs`, or
/// `None` if no such gap occurs within the scan limit.
pub fn find_short_run(rows: &[String], limits: &TrimLimits) -> Option<usize> {
    let min_gap = Duration::seconds(limits.min_gap_secs);
    let mut last = row_timestamp(rows.first()?)?;

    let mut n = 1;
    while n < rows.len() {
        let current = row_timestamp(&rows[n])?;
        if current - last > min_gap {
            return Some(n);
        }
        if n > limits.scan_limit_rows {
            return None;
        }
        last = current;
        n += 1;
    }
    None
}

/// Find the lead-in cuts for `rows` without modifying them
pub fn trim_lead_in(rows: &[String], limits: &TrimLimits) -> TrimOutcome {
    let mut outcome = TrimOutcome::default();
    let original_first = match rows.first().and_then(|row| row_timestamp(row)) {
        Some(ts) => ts,
        None => return outcome,
    };
    let max_span = Duration::seconds(limits.max_removal_span_secs);
    let mut start = 0;

    while start < rows.len() {
        let current_first = match row_timestamp(&rows[start]) {
            Some(ts) => ts,
            None => break,
        };
        if current_first - original_first >= max_span {
            break;
        }
        match find_short_run(&rows[start..], limits) {
            Some(n) if start + n < limits.max_removal_rows => {
                outcome.cuts.push(n);
                start += n;
            }
            _ => break,
        }
    }
    outcome
}

/// Remove the lead-in from the merged rows. Only runs at [`FilterLevel::Max`].
pub fn trim_rows(mut state: ConversionState, limits: &TrimLimits) -> ConversionState {
    if state.resolved.filter_level != FilterLevel::Max {
        return state;
    }

    let outcome = trim_lead_in(&state.working.rows, limits);
    for n in &outcome.cuts {
        let first = state.working.rows.first().cloned().unwrap_or_default();
        let last = state
            .working
            .rows
            .get(n - 1)
            .cloned()
            .unwrap_or_default();
        state.record_info(
            Stage::TemporalTrimmer,
            IssueCategory::Temporal,
            format!(
                "Trimmed {} lead-in rows from {} to {}.",
                n,
                first.split(',').next().unwrap_or_default(),
                last.split(',').next().unwrap_or_default()
            ),
        );
        state.working.rows.drain(..*n);
    }

    state.resolved.row_count = state.working.rows.len();
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::row;
    use crate::types::parse_row_timestamp;
    use chrono::NaiveDateTime;
    use pretty_assertions::assert_eq;

    fn start() -> NaiveDateTime {
        parse_row_timestamp("2023-08-01 12:00:00").unwrap()
    }

    /// Build rows from (offset in seconds from the previous cluster end, count)
    /// clusters sampled every 5 seconds.
    fn clusters(layout: &[(i64, usize)]) -> Vec<String> {
        let mut rows = Vec::new();
        let mut t = start();
        for (i, (gap, count)) in layout.iter().enumerate() {
            if i > 0 {
                t += Duration::seconds(*gap);
            }
            for _ in 0..*count {
                rows.push(row(&t.format("%Y-%m-%d %H:%M:%S").to_string()));
                t += Duration::seconds(5);
            }
        }
        rows
    }

    #[test]
    fn test_continuous_data_untouched() {
        let rows = clusters(&[(0, 500)]);
        assert_eq!(find_short_run(&rows, &TrimLimits::default()), None);
        assert_eq!(trim_lead_in(&rows, &TrimLimits::default()).removed(), 0);
    }

    #[test]
    fn test_single_lead_in_removed() {
        let rows = clusters(&[(0, 10), (7200, 400)]);
        assert_eq!(find_short_run(&rows, &TrimLimits::default()), Some(10));
        let outcome = trim_lead_in(&rows, &TrimLimits::default());
        assert_eq!(outcome.cuts, vec![10]);
    }

    #[test]
    fn test_repeated_lead_ins_removed() {
        let rows = clusters(&[(0, 10), (600, 20), (600, 400)]);
        let outcome = trim_lead_in(&rows, &TrimLimits::default());
        assert_eq!(outcome.cuts, vec![10, 20]);
    }

    #[test]
    fn test_gap_beyond_scan_limit_ignored() {
        let rows = clusters(&[(0, 300), (7200, 100)]);
        assert_eq!(find_short_run(&rows, &TrimLimits::default()), None);
        assert_eq!(trim_lead_in(&rows, &TrimLimits::default()).removed(), 0);
    }

    #[test]
    fn test_cumulative_row_bound() {
        let rows = clusters(&[(0, 200), (60, 200), (60, 400)]);
        let outcome = trim_lead_in(&rows, &TrimLimits::default());
        assert_eq!(outcome.cuts, vec![200]);
        assert!(outcome.removed() < TrimLimits::default().max_removal_rows);
    }

    #[test]
    fn test_no_cut_after_span_reached() {
        // second cluster starts more than an hour after the first row
        let rows = clusters(&[(0, 10), (3700, 10), (600, 400)]);
        let outcome = trim_lead_in(&rows, &TrimLimits::default());
        assert_eq!(outcome.cuts, vec![10]);
    }

    #[test]
    fn test_empty_and_single_row() {
        let limits = TrimLimits::default();
        assert_eq!(trim_lead_in(&[], &limits), TrimOutcome::default());
        let rows = clusters(&[(0, 1)]);
        assert_eq!(trim_lead_in(&rows, &limits).removed(), 0);
    }

    #[test]
    fn test_trim_rows_respects_filter_level() {
        let rows = clusters(&[(0, 10), (7200, 400)]);

        let mut state = ConversionState::new("in", "out", FilterLevel::Max);
        state.working.rows = rows.clone();
        let state = trim_rows(state, &TrimLimits::default());
        assert_eq!(state.working.rows.len(), 400);
        assert_eq!(state.resolved.row_count, 400);
        assert_eq!(state.error_count(), 0);
        assert_eq!(
            state.issue_messages(),
            vec!["INFO: Trimmed 10 lead-in rows from 2023-08-01 12:00:00 to 2023-08-01 12:00:45."
                .to_string()]
        );

        let mut state = ConversionState::new("in", "out", FilterLevel::ShortFiles);
        state.working.rows = rows;
        let state = trim_rows(state, &TrimLimits::default());
        assert_eq!(state.working.rows.len(), 410);
    }
}
