use std::collections::HashSet;

use issuemap_common::Issue;

/// Whether an issue is worth aggregating: credible enough (inclusive) and open.
pub fn is_admissible(issue: &Issue, min_credibility: f64) -> bool {
    issue.credibility >= min_credibility && issue.is_open()
}

/// Ids of every issue admitted since the last relocation reset.
#[derive(Debug, Default)]
pub struct IssueLedger {
    seen: HashSet<String>,
}

impl IssueLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit the issues that are unseen and admissible, marking them seen.
    /// Rejected issues are not marked and will be evaluated again if sighted
    /// later.
    pub fn admit(&mut self, issues: Vec<Issue>, min_credibility: f64) -> Vec<Issue> {
        let mut admitted = Vec::new();
        for issue in issues {
            if !self.seen.contains(&issue.id)
                && is_admissible(&issue, min_credibility)
                && self.seen.insert(issue.id.clone())
            {
                admitted.push(issue);
            }
        }
        admitted
    }

    /// Forget an issue so a later cycle can aggregate it again.
    pub fn revert(&mut self, issue_id: &str) -> bool {
        self.seen.remove(issue_id)
    }

    pub fn contains(&self, issue_id: &str) -> bool {
        self.seen.contains(issue_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
