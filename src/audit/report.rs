//! Run Reports
//!
//! Summarizes execution records for terminal output.

use std::collections::BTreeMap;

use colored::Colorize;

use crate::catalog::{ExecutionRecord, ExecutionStatus};
use crate::error::FailureKind;

/// Counts over a set of execution records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_records(records: &[ExecutionRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            match record.status {
                ExecutionStatus::Succeeded => summary.succeeded += 1,
                ExecutionStatus::Failed => {
                    summary.failed += 1;
                    let kind = record
                        .failure_kind()
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    *summary.failures_by_kind.entry(kind).or_insert(0) += 1;
                }
            }
        }
        summary
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures_by_kind
            .get(&kind.to_string())
            .copied()
            .unwrap_or(0)
    }
}

/// Renders one line per record followed by totals.
pub fn render_summary(records: &[ExecutionRecord]) -> String {
    let mut output = String::from("\nExecution Summary:\n\n");

    if records.is_empty() {
        output.push_str("No steps executed\n");
        return output;
    }

    for record in records {
        let duration_ms = (record.finished_at - record.started_at)
            .num_milliseconds()
            .max(0);

        let status = match record.status {
            ExecutionStatus::Succeeded => record.status.to_string().green(),
            ExecutionStatus::Failed => record.status.to_string().red(),
        };

        output.push_str(&format!(
            "{:10} #{:<3} {:32} {:9} {} attempt(s) ({} ms)\n",
            truncate(&record.test_case_id, 10),
            record.step_id,
            truncate(&record.step_name, 32),
            status,
            record.attempts,
            duration_ms
        ));

        if let Some(ref failure) = record.failure {
            let kind = format!("[{}]", failure.kind);
            output.push_str(&format!("    {} {}\n", kind.yellow(), failure.message));
        }
    }

    let summary = RunSummary::from_records(records);
    output.push_str(&format!(
        "\nTotal: {} records, {} succeeded, {} failed\n",
        summary.total, summary.succeeded, summary.failed
    ));
    output
}

/// Pads or truncates a string to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
