//! Scenario identifiers, verdicts and reports

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use ulid::Ulid;

/// Unique scenario run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScenarioId(pub Ulid);

impl ScenarioId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ScenarioId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upgrade strategy under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// One member at a time, verifying after each restart
    Rolling,
    /// Every member at once behind a join barrier
    Restart,
}

impl ScenarioKind {
    /// Both strategies, in the order they are run
    pub const ALL: [ScenarioKind; 2] = [ScenarioKind::Rolling, ScenarioKind::Restart];

    /// Short name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioKind::Rolling => "rolling",
            ScenarioKind::Restart => "restart",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rolling" => Ok(ScenarioKind::Rolling),
            "restart" => Ok(ScenarioKind::Restart),
            other => Err(format!("unknown scenario: {other}")),
        }
    }
}

/// Final outcome of one scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Verdict {
    /// Every check held
    Passed,
    /// A precondition was missing; nothing was run
    Skipped {
        /// What was missing
        reason: String,
    },
    /// A fatal error aborted the run
    Failed {
        /// Error display
        reason: String,
        /// Whether data was lost or refused
        correctness_violation: bool,
    },
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => f.write_str("PASS"),
            Verdict::Skipped { reason } => write!(f, "SKIP ({reason})"),
            Verdict::Failed { reason, .. } => write!(f, "FAIL ({reason})"),
        }
    }
}

/// Report from one scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Run identifier
    pub id: ScenarioId,
    /// Strategy run
    pub kind: ScenarioKind,
    /// Outcome
    pub verdict: Verdict,
    /// Members moved onto the new binary
    pub nodes_upgraded: usize,
    /// Records seeded before any restart
    pub records_seeded: usize,
    /// Convergence polls made, whether or not the version converged
    pub convergence_attempts: Option<u32>,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl ScenarioReport {
    /// Check if the run passed every check
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    /// Check if the run was skipped
    #[inline]
    #[must_use]
    pub fn skipped(&self) -> bool {
        matches!(self.verdict, Verdict::Skipped { .. })
    }

    /// Check if the run failed
    #[inline]
    #[must_use]
    pub fn failed(&self) -> bool {
        matches!(self.verdict, Verdict::Failed { .. })
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str(&format!("=== {} upgrade scenario ===\n\n", self.kind));
        report.push_str(&format!("Run: {}\n", self.id));
        report.push_str(&format!("Records Seeded: {}\n", self.records_seeded));
        report.push_str(&format!("Nodes Upgraded: {}\n", self.nodes_upgraded));
        if let Some(attempts) = self.convergence_attempts {
            report.push_str(&format!("Convergence Attempts: {attempts}\n"));
        }
        report.push_str(&format!("Elapsed: {:.2}s\n", self.elapsed.as_secs_f64()));

        if let Verdict::Failed {
            correctness_violation: true,
            ..
        } = self.verdict
        {
            report.push_str("\n!!! CRITICAL: committed data was lost or refused across the upgrade\n");
        }

        report.push_str(&format!("\n=== Result: {} ===\n", self.verdict));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(verdict: Verdict) -> ScenarioReport {
        ScenarioReport {
            id: ScenarioId::new(),
            kind: ScenarioKind::Rolling,
            verdict,
            nodes_upgraded: 3,
            records_seeded: 5,
            convergence_attempts: Some(2),
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn kind_round_trips_through_its_name() {
        for kind in ScenarioKind::ALL {
            assert_eq!(kind.as_str().parse::<ScenarioKind>().unwrap(), kind);
        }
        assert!("chaos".parse::<ScenarioKind>().is_err());
    }

    #[test]
    fn skipped_is_neither_passed_nor_failed() {
        let r = report(Verdict::Skipped {
            reason: "missing binary".into(),
        });
        assert!(r.skipped());
        assert!(!r.passed());
        assert!(!r.failed());
    }

    #[test]
    fn text_report_shows_result_and_counts() {
        let text = report(Verdict::Passed).generate_text();
        assert!(text.contains("=== rolling upgrade scenario ==="));
        assert!(text.contains("Records Seeded: 5"));
        assert!(text.contains("Convergence Attempts: 2"));
        assert!(text.ends_with("=== Result: PASS ===\n"));
    }

    #[test]
    fn correctness_failures_are_flagged() {
        let text = report(Verdict::Failed {
            reason: "key \"foo1\" lost".into(),
            correctness_violation: true,
        })
        .generate_text();
        assert!(text.contains("CRITICAL"));
        assert!(text.contains("FAIL (key \"foo1\" lost)"));
    }

    #[test]
    fn verdict_serializes_with_tag() {
        let json = serde_json::to_string(&Verdict::Skipped {
            reason: "x".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"verdict":"skipped","reason":"x"}"#);
    }
}
