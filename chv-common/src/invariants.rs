//! Invariant library: pure predicates over probe snapshots.
//!
//! Every predicate here operates on an [`Observation`] that has already been
//! fetched; nothing in this module re-polls or talks to a cluster. That keeps
//! each assertion deterministic given its inputs and testable without live
//! infrastructure. Polling, retries, and deadlines live in the engine.

use serde::{Deserialize, Serialize};

use crate::types::{LifecyclePhase, ReplicationRole, UnitId};

/// One invariant to evaluate after a step settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assertion {
    /// The unit's lifecycle phase matches exactly. No tolerance.
    PhaseEquals { unit: UnitId, phase: LifecyclePhase },
    /// A cache protocol command's reply matches the expected bytes exactly.
    /// The engine allows at most one retry for a transient role election.
    ResponseEquals {
        role: ReplicationRole,
        command: Vec<String>,
        expected: Vec<u8>,
    },
    /// The topology probe discovers exactly this many secondaries.
    ReplicaCountEquals(usize),
    /// The coordinator quorum currently has exactly this many members.
    QuorumSizeEquals(usize),
}

impl Assertion {
    /// Convenience constructor for the common byte-reply case.
    pub fn response(
        role: ReplicationRole,
        command: &[&str],
        expected: impl Into<Vec<u8>>,
    ) -> Self {
        Self::ResponseEquals {
            role,
            command: command.iter().map(|s| s.to_string()).collect(),
            expected: expected.into(),
        }
    }

    /// Maximum evaluation attempts, where `None` means "until the step deadline".
    ///
    /// `ResponseEquals` gets exactly one retry: a mismatch can be a role
    /// election in flight, but repeated mismatch is a real failure and
    /// re-running commands with side effects (`del`) must stay bounded.
    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            Self::ResponseEquals { .. } => Some(2),
            _ => None,
        }
    }

    /// Short human-readable form for reports.
    pub fn describe(&self) -> String {
        match self {
            Self::PhaseEquals { unit, phase } => format!("{unit} is {phase}"),
            Self::ResponseEquals { role, command, .. } => {
                format!("{role} `{}` reply", command.join(" "))
            }
            Self::ReplicaCountEquals(n) => format!("secondary count is {n}"),
            Self::QuorumSizeEquals(n) => format!("quorum size is {n}"),
        }
    }
}

/// A snapshot of probe output, matched by kind to the assertion it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Phase checker verdict (exit 0 = match).
    PhaseMatches(bool),
    /// Raw data-plane reply bytes.
    Response(Vec<u8>),
    /// Raw secondary-address listing.
    Secondaries(String),
    /// Raw coordinator-address listing.
    Coordinators(String),
}

/// Expected vs. actual, rendered for the scenario report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    fn new(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Evaluate one assertion against one observation.
///
/// An observation of the wrong kind is a programming error in the engine and
/// reported as a mismatch rather than panicking mid-run.
pub fn evaluate(assertion: &Assertion, observation: &Observation) -> Result<(), Mismatch> {
    match (assertion, observation) {
        (Assertion::PhaseEquals { phase, .. }, Observation::PhaseMatches(matched)) => {
            if *matched {
                Ok(())
            } else {
                Err(Mismatch::new(phase.to_string(), format!("not {phase}")))
            }
        }
        (Assertion::ResponseEquals { expected, .. }, Observation::Response(actual)) => {
            if expected == actual {
                Ok(())
            } else {
                Err(Mismatch::new(render_bytes(expected), render_bytes(actual)))
            }
        }
        (Assertion::ReplicaCountEquals(expected), Observation::Secondaries(raw)) => {
            count_equals(*expected, raw)
        }
        (Assertion::QuorumSizeEquals(expected), Observation::Coordinators(raw)) => {
            count_equals(*expected, raw)
        }
        (assertion, observation) => Err(Mismatch::new(
            assertion.describe(),
            format!("observation of wrong kind: {observation:?}"),
        )),
    }
}

fn count_equals(expected: usize, raw: &str) -> Result<(), Mismatch> {
    let addresses = parse_address_list(raw);
    if addresses.len() == expected {
        Ok(())
    } else {
        Err(Mismatch::new(
            format!("{expected} addresses"),
            format!("{} addresses: {addresses:?}", addresses.len()),
        ))
    }
}

/// Normalize a newline-separated address listing.
///
/// The underlying listing commands emit one address per line and usually a
/// trailing empty line. Empty and whitespace-only entries are filtered out
/// rather than compensated with an off-by-one subtraction, so the count is
/// correct whether or not the artifact is present.
pub fn parse_address_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn render_bytes(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).escape_debug().to_string()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::types::UnitId;

    #[test]
    fn phase_equals_has_no_tolerance() {
        let assertion = Assertion::PhaseEquals {
            unit: UnitId::server(0),
            phase: LifecyclePhase::Running,
        };
        assert!(evaluate(&assertion, &Observation::PhaseMatches(true)).is_ok());
        let mismatch = evaluate(&assertion, &Observation::PhaseMatches(false)).unwrap_err();
        assert_eq!(mismatch.expected, "Running");
    }

    #[test]
    fn response_equals_is_exact_byte_match() {
        let assertion = Assertion::response(ReplicationRole::Primary, &["get", "foo"], b"bar\n".to_vec());
        assert!(evaluate(&assertion, &Observation::Response(b"bar\n".to_vec())).is_ok());

        // A missing trailing newline is a mismatch, not a near-miss.
        let mismatch = evaluate(&assertion, &Observation::Response(b"bar".to_vec())).unwrap_err();
        assert_eq!(mismatch.expected, "bar\\n");
        assert_eq!(mismatch.actual, "bar");
    }

    #[test]
    fn response_equals_allows_exactly_one_retry() {
        let assertion = Assertion::response(ReplicationRole::Primary, &["del", "foo"], b"1\n".to_vec());
        assert_eq!(assertion.max_attempts(), Some(2));
        let assertion = Assertion::ReplicaCountEquals(2);
        assert_eq!(assertion.max_attempts(), None);
    }

    #[test]
    fn trailing_empty_line_is_normalized() {
        assert_eq!(
            parse_address_list("10.0.0.1\n10.0.0.2\n"),
            vec!["10.0.0.1", "10.0.0.2"]
        );
        assert_eq!(
            parse_address_list("10.0.0.1\n10.0.0.2"),
            vec!["10.0.0.1", "10.0.0.2"]
        );
        assert!(parse_address_list("").is_empty());
        assert!(parse_address_list("\n\n").is_empty());
    }

    #[test]
    fn replica_count_uses_normalized_listing() {
        let assertion = Assertion::ReplicaCountEquals(2);
        let observation = Observation::Secondaries("10.0.0.1\n10.0.0.2\n".to_string());
        assert!(evaluate(&assertion, &observation).is_ok());

        let observation = Observation::Secondaries("10.0.0.1\n".to_string());
        let mismatch = evaluate(&assertion, &observation).unwrap_err();
        assert_eq!(mismatch.expected, "2 addresses");
        assert!(mismatch.actual.starts_with("1 addresses"));
    }

    #[test]
    fn quorum_size_uses_normalized_listing() {
        let assertion = Assertion::QuorumSizeEquals(3);
        let observation =
            Observation::Coordinators("10.0.1.1\n10.0.1.2\n10.0.1.3\n".to_string());
        assert!(evaluate(&assertion, &observation).is_ok());
    }

    #[test]
    fn kind_mismatch_is_reported_not_panicked() {
        let assertion = Assertion::ReplicaCountEquals(2);
        let observation = Observation::Response(b"bar\n".to_vec());
        let mismatch = evaluate(&assertion, &observation).unwrap_err();
        assert!(mismatch.actual.contains("wrong kind"));
    }

    proptest! {
        /// The normalized count never depends on trailing or duplicated newlines.
        #[test]
        fn normalization_counts_nonempty_lines(
            addrs in prop::collection::vec("[a-z0-9.]{1,16}", 0..8),
            trailing in 0usize..3,
        ) {
            let mut raw = addrs.join("\n");
            raw.push_str(&"\n".repeat(trailing));
            prop_assert_eq!(parse_address_list(&raw).len(), addrs.len());
        }
    }
}
