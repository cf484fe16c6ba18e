//! Run results.
//!
//! A [`Report`] collects single-shot check results and scenario results
//! in the order they finished. Rendering lives in the binary.

use std::time::Duration;

use crate::evaluate::Check;
use crate::failover::Transition;

/// Final outcome of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
    /// Baseline health did not hold, so no fault was injected.
    Skipped,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Passed => write!(f, "PASSED"),
            Verdict::Failed => write!(f, "FAILED"),
            Verdict::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Result of one single-shot check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub reason: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            reason: None,
        }
    }

    pub fn fail(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            reason: Some(reason.into()),
        }
    }

    /// Wraps a predicate outcome under a display name.
    pub fn from_check(name: impl Into<String>, check: &Check) -> Self {
        if check.passed() {
            Self::pass(name)
        } else {
            Self::fail(name, check.to_string())
        }
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    pub name: String,
    pub transitions: Vec<Transition>,
    pub verdict: Verdict,
    pub reason: Option<String>,
    /// Whether the restore action completed without error.
    pub restored: bool,
    pub elapsed: Duration,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }
}

/// One entry in a [`Report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportItem {
    Check(CheckResult),
    Scenario(ScenarioResult),
}

impl ReportItem {
    pub fn passed(&self) -> bool {
        match self {
            ReportItem::Check(c) => c.passed,
            ReportItem::Scenario(s) => s.passed(),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    items: Vec<ReportItem>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_check(&mut self, result: CheckResult) {
        self.items.push(ReportItem::Check(result));
    }

    pub fn add_scenario(&mut self, result: ScenarioResult) {
        self.items.push(ReportItem::Scenario(result));
    }

    pub fn items(&self) -> &[ReportItem] {
        &self.items
    }

    pub fn passed_count(&self) -> usize {
        self.items.iter().filter(|i| i.passed()).count()
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// True when there is at least one item and every item passed.
    /// Skipped scenarios count as failures.
    pub fn success(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(ReportItem::passed)
    }

    /// Process exit status: 0 on full pass, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.success() {
            0
        } else {
            1
        }
    }
}
