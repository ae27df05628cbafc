//! Cache HA Verifier - shared library.
//!
//! Verifies that a replicated, quorum-coordinated cache cluster on a
//! container orchestrator maintains its high-availability invariants across
//! disruptive events: the [`engine`] drives disruption scenarios from the
//! [`catalog`], evaluates the pure predicates in [`invariants`], and talks to
//! the cluster only through the narrow capabilities in [`probe`] (live
//! implementations in [`kubectl`], an in-memory fake in [`mock`]).

pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod invariants;
pub mod kubectl;
pub mod logging;
pub mod mock;
pub mod probe;
pub mod types;

pub use config::{EngineConfig, VerifierConfig};
pub use engine::{AssertionFailure, ScenarioEngine, ScenarioReport};
pub use errors::{InfraError, InfraResult};
pub use logging::{LogConfig, init_logging};
pub use types::{
    Action, ClusterTopology, LifecyclePhase, ReplicationRole, Scenario, Step, UnitId, UnitRole,
};
