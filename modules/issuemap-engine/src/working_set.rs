use std::collections::HashSet;

use issuemap_common::{Report, ReportKey};

/// Every report aggregated since the last relocation reset, in arrival
/// order, unique by `(issue, report)` key. Only grows between resets.
#[derive(Debug, Default, Clone)]
pub struct WorkingReportSet {
    reports: Vec<Report>,
    keys: HashSet<ReportKey>,
}

impl WorkingReportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the reports whose key is not present yet. Returns how many
    /// were added.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Report>) -> usize {
        let before = self.reports.len();
        for report in incoming {
            if self.keys.insert(report.key()) {
                self.reports.push(report);
            }
        }
        self.reports.len() - before
    }

    pub fn contains(&self, key: &ReportKey) -> bool {
        self.keys.contains(key)
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn clear(&mut self) {
        self.reports.clear();
        self.keys.clear();
    }
}
