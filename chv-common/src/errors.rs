//! Infrastructure error taxonomy.
//!
//! These errors cover everything that is *not* an invariant mismatch: a probe
//! or orchestrator command that could not run or exited unexpectedly, a
//! convergence window that never closed, or a scenario that blew its overall
//! budget. Assertion mismatches are data ([`crate::invariants::Mismatch`]),
//! never errors; the two classes are disjoint by design.

use std::time::Duration;

/// A hard failure of the harness or its collaborators. Aborts the scenario;
/// teardown is still attempted.
#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` exited with status {exit_code}")]
    CommandFailed { command: String, exit_code: i32 },

    #[error("command `{command}` exceeded its {timeout:?} timeout")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("{what} did not converge within {budget:?}")]
    ConvergenceTimeout { what: String, budget: Duration },

    #[error("scenario `{scenario}` exceeded its {budget:?} budget")]
    ScenarioBudgetExceeded { scenario: String, budget: Duration },

    #[error("probe produced non-utf8 output for `{command}`")]
    MalformedOutput { command: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for probe and engine operations.
pub type InfraResult<T> = Result<T, InfraError>;
