// SPDX-License-Identifier: AGPL-3.0-only

//! Pass/fail harness for the `validate_*` binaries.
//!
//! Each binary records named checks against thresholds from
//! [`crate::tolerances`], prints a summary, and exits 0 when everything
//! passed or 1 otherwise.

use std::fmt::Write as _;
use std::process;

/// How a threshold was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToleranceMode {
    /// `|observed − expected| < tol`
    Absolute,
    /// `|observed − expected| / |expected| < tol`
    Relative,
    /// `observed < tol`
    UpperBound,
    /// boolean condition
    Condition,
}

impl std::fmt::Display for ToleranceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absolute => write!(f, "abs"),
            Self::Relative => write!(f, "rel"),
            Self::UpperBound => write!(f, "<"),
            Self::Condition => write!(f, "bool"),
        }
    }
}

/// One recorded check.
#[derive(Debug, Clone)]
pub struct Check {
    pub label: String,
    pub passed: bool,
    pub observed: f64,
    pub expected: f64,
    pub tolerance: f64,
    pub mode: ToleranceMode,
}

/// Collects checks for one validation binary.
#[derive(Debug, Default)]
#[must_use]
pub struct ValidationHarness {
    pub name: String,
    pub checks: Vec<Check>,
}

impl ValidationHarness {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            checks: Vec::new(),
        }
    }

    fn push(&mut self, label: &str, passed: bool, observed: f64, expected: f64, tolerance: f64, mode: ToleranceMode) {
        log::debug!("{}: {label} {}", self.name, if passed { "ok" } else { "FAILED" });
        self.checks.push(Check {
            label: label.to_string(),
            passed,
            observed,
            expected,
            tolerance,
            mode,
        });
    }

    pub fn check_abs(&mut self, label: &str, observed: f64, expected: f64, tolerance: f64) {
        let passed = (observed - expected).abs() < tolerance;
        self.push(label, passed, observed, expected, tolerance, ToleranceMode::Absolute);
    }

    /// Falls back to an absolute check when `expected` is zero.
    pub fn check_rel(&mut self, label: &str, observed: f64, expected: f64, tolerance: f64) {
        let err = if expected.abs() > f64::EPSILON {
            ((observed - expected) / expected).abs()
        } else {
            observed.abs()
        };
        self.push(label, err < tolerance, observed, expected, tolerance, ToleranceMode::Relative);
    }

    pub fn check_upper(&mut self, label: &str, observed: f64, threshold: f64) {
        self.push(label, observed < threshold, observed, threshold, threshold, ToleranceMode::UpperBound);
    }

    pub fn check_bool(&mut self, label: &str, passed: bool) {
        self.push(label, passed, f64::from(u8::from(passed)), 1.0, 0.0, ToleranceMode::Condition);
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(
            s,
            "═══ {} validation: {}/{} checks passed ═══",
            self.name,
            self.passed_count(),
            self.checks.len()
        );
        for c in &self.checks {
            let icon = if c.passed { "✓" } else { "✗" };
            let _ = writeln!(
                s,
                "  {icon} {}: observed={:.6e}, expected={:.6e}, tol={:.2e} ({})",
                c.label, c.observed, c.expected, c.tolerance, c.mode
            );
        }
        if self.all_passed() {
            s.push_str("ALL CHECKS PASSED");
        } else {
            let failed: Vec<&str> = self.checks.iter().filter(|c| !c.passed).map(|c| c.label.as_str()).collect();
            let _ = write!(s, "FAILED CHECKS: {}", failed.join(", "));
        }
        s
    }

    /// Print the summary and exit: 0 when every check passed, else 1.
    pub fn finish(&self) -> ! {
        println!();
        println!("{}", self.summary());
        process::exit(i32::from(!self.all_passed()))
    }
}
