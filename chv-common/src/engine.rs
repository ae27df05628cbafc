//! Disruption scenario engine.
//!
//! Owns the polling discipline and the pass/fail decision. Steps run strictly
//! sequentially on one thread: an action's effects must settle before the
//! next assertion is meaningful, and the single-primary and quorum-size
//! invariants only make sense relative to a settled state.
//!
//! All waits are bounded poll loops (interval + deadline) that re-check the
//! condition and exit early on success. A window that never closes surfaces
//! as an infrastructure error, distinct from an assertion mismatch.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use crate::config::EngineConfig;
use crate::errors::{InfraError, InfraResult};
use crate::invariants::{self, Assertion, Observation};
use crate::probe::Cluster;
use crate::types::{Action, ClusterTopology, LifecyclePhase, Scenario};

/// One failed assertion, with enough context to diagnose it from the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionFailure {
    pub step: String,
    pub assertion: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of one scenario run.
///
/// `passed` is strict: every assertion in every step held and no
/// infrastructure error occurred. No partial credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub passed: bool,
    pub failures: Vec<AssertionFailure>,
    /// Present iff the run aborted on an infrastructure error.
    pub infra_error: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
}

/// Internal classification of a poll outcome.
enum PollFailure {
    Mismatch(invariants::Mismatch),
    Infra(InfraError),
}

/// Drives scenarios against a [`Cluster`].
pub struct ScenarioEngine<'a> {
    cluster: &'a dyn Cluster,
    config: EngineConfig,
}

impl<'a> ScenarioEngine<'a> {
    pub fn new(cluster: &'a dyn Cluster, config: EngineConfig) -> Self {
        Self { cluster, config }
    }

    /// Run one scenario end to end: materialize the topology, execute every
    /// step, and tear the topology down on every exit path.
    pub fn run(&self, scenario: &Scenario, topology: &ClusterTopology) -> ScenarioReport {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        info!(scenario = %scenario.name, namespace = %topology.namespace, "scenario started");

        let mut failures = Vec::new();
        let mut infra_error: Option<InfraError> = None;

        match self.setup(topology) {
            Ok(()) => {
                if let Err(error) =
                    self.run_steps(scenario, start, &mut failures)
                {
                    infra_error = Some(error);
                }
            }
            Err(error) => infra_error = Some(error),
        }

        // Teardown runs regardless of the verdict so the namespace is clean
        // for the next run.
        if let Err(error) = self.teardown(topology) {
            warn!(scenario = %scenario.name, %error, "teardown failed");
            infra_error.get_or_insert(error);
        }

        let passed = failures.is_empty() && infra_error.is_none();
        let duration = start.elapsed();
        if passed {
            info!(scenario = %scenario.name, duration_ms = duration.as_millis() as u64, "scenario passed");
        } else {
            warn!(
                scenario = %scenario.name,
                failed_assertions = failures.len(),
                infra_error = ?infra_error.as_ref().map(ToString::to_string),
                "scenario failed"
            );
        }

        ScenarioReport {
            scenario: scenario.name.clone(),
            passed,
            failures,
            infra_error: infra_error.map(|e| e.to_string()),
            started_at,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Materialize the topology and wait for every declared ordinal to reach
    /// `Running`. Probing earlier than the replication handshake and quorum
    /// formation allow produces false negatives, not true failures.
    fn setup(&self, topology: &ClusterTopology) -> InfraResult<()> {
        self.cluster.create(topology)?;
        let units: Vec<_> = topology.units().collect();
        self.wait_for(
            "baseline topology to reach Running",
            self.config.baseline_settle,
            || {
                for unit in &units {
                    if !self.cluster.check_phase(unit, LifecyclePhase::Running)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
        )
    }

    /// Delete the topology and wait for its units to leave `Running`.
    fn teardown(&self, topology: &ClusterTopology) -> InfraResult<()> {
        self.cluster.destroy(topology)?;
        let units: Vec<_> = topology.units().collect();
        self.wait_for(
            "namespace to drain after teardown",
            self.config.teardown_settle,
            || {
                for unit in &units {
                    if self.cluster.check_phase(unit, LifecyclePhase::Running)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
        )
    }

    fn run_steps(
        &self,
        scenario: &Scenario,
        start: Instant,
        failures: &mut Vec<AssertionFailure>,
    ) -> InfraResult<()> {
        let budget_deadline = start + scenario.timeout;

        for step in &scenario.steps {
            if Instant::now() >= budget_deadline {
                return Err(InfraError::ScenarioBudgetExceeded {
                    scenario: scenario.name.clone(),
                    budget: scenario.timeout,
                });
            }

            debug!(scenario = %scenario.name, step = %step.name, "step started");
            if let Some(action) = &step.action {
                self.perform(action)?;
            }

            let settle_deadline = Instant::now() + step.settle;
            for assertion in &step.assertions {
                match self.poll_assertion(assertion, settle_deadline, budget_deadline, scenario) {
                    Ok(()) => {}
                    Err(PollFailure::Mismatch(mismatch)) => {
                        warn!(
                            scenario = %scenario.name,
                            step = %step.name,
                            assertion = %assertion.describe(),
                            expected = %mismatch.expected,
                            actual = %mismatch.actual,
                            "assertion failed"
                        );
                        failures.push(AssertionFailure {
                            step: step.name.clone(),
                            assertion: assertion.describe(),
                            expected: mismatch.expected,
                            actual: mismatch.actual,
                        });
                        // Short-circuit the rest of this step; later steps
                        // still run to maximize diagnostic information.
                        break;
                    }
                    Err(PollFailure::Infra(error)) => return Err(error),
                }
            }
        }

        Ok(())
    }

    fn perform(&self, action: &Action) -> InfraResult<()> {
        info!(action = %action, "performing disruption");
        match action {
            Action::DeleteUnit(unit) => self.cluster.delete_unit(unit),
            Action::Scale { role, replicas } => self.cluster.scale(*role, *replicas),
        }
    }

    /// Poll one assertion until it holds, its attempt cap is spent, or the
    /// settle deadline passes. Probe failures abort immediately.
    fn poll_assertion(
        &self,
        assertion: &Assertion,
        settle_deadline: Instant,
        budget_deadline: Instant,
        scenario: &Scenario,
    ) -> Result<(), PollFailure> {
        let cap = assertion.max_attempts();
        let mut attempts = 0u32;

        loop {
            if Instant::now() >= budget_deadline {
                return Err(PollFailure::Infra(InfraError::ScenarioBudgetExceeded {
                    scenario: scenario.name.clone(),
                    budget: scenario.timeout,
                }));
            }

            let observation = self.observe(assertion).map_err(PollFailure::Infra)?;
            attempts += 1;
            let mismatch = match invariants::evaluate(assertion, &observation) {
                Ok(()) => {
                    debug!(assertion = %assertion.describe(), attempts, "assertion satisfied");
                    return Ok(());
                }
                Err(mismatch) => mismatch,
            };

            // Capped assertions (data-plane replies) ignore the settle
            // deadline and use their retry budget; everything else re-checks
            // until the window closes.
            let retry = match cap {
                Some(cap) => attempts < cap,
                None => Instant::now() < settle_deadline,
            };
            if !retry {
                return Err(PollFailure::Mismatch(mismatch));
            }

            let backoff = if cap.is_some() {
                self.config.retry_backoff
            } else {
                self.config.poll_interval
            };
            thread::sleep(backoff);
        }
    }

    /// Fetch the snapshot an assertion is evaluated against. Probes whose
    /// contract reserves non-zero exits for failure surface those exits as
    /// infrastructure errors here.
    fn observe(&self, assertion: &Assertion) -> InfraResult<Observation> {
        match assertion {
            Assertion::PhaseEquals { unit, phase } => Ok(Observation::PhaseMatches(
                self.cluster.check_phase(unit, *phase)?,
            )),
            Assertion::ResponseEquals { role, command, .. } => {
                let output = self.cluster.invoke(*role, command)?;
                if !output.success() {
                    return Err(InfraError::CommandFailed {
                        command: format!("{role} {}", command.join(" ")),
                        exit_code: output.exit_code,
                    });
                }
                Ok(Observation::Response(output.stdout))
            }
            Assertion::ReplicaCountEquals(_) => {
                Ok(Observation::Secondaries(self.cluster.list_secondaries()?))
            }
            Assertion::QuorumSizeEquals(_) => {
                Ok(Observation::Coordinators(self.cluster.list_coordinators()?))
            }
        }
    }

    /// Bounded poll loop for setup/teardown convergence.
    fn wait_for(
        &self,
        what: &str,
        budget: Duration,
        mut check: impl FnMut() -> InfraResult<bool>,
    ) -> InfraResult<()> {
        let start = Instant::now();
        debug!(what, budget = ?budget, "waiting for convergence");
        loop {
            if check()? {
                debug!(what, elapsed = ?start.elapsed(), "converged");
                return Ok(());
            }
            if start.elapsed() >= budget {
                return Err(InfraError::ConvergenceTimeout {
                    what: what.to_string(),
                    budget,
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }
}

/// Run every scenario in order, returning all reports.
pub fn run_all(
    engine: &ScenarioEngine<'_>,
    scenarios: &[Scenario],
    topology: &ClusterTopology,
) -> Vec<ScenarioReport> {
    scenarios
        .iter()
        .map(|scenario| engine.run(scenario, topology))
        .collect()
}
