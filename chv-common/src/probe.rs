//! Probe capability traits.
//!
//! The scenario engine and the invariant library never talk to a live cluster
//! directly; they see the four narrow capabilities below. Production wires in
//! the shell-out implementations from [`crate::kubectl`], tests wire in
//! [`crate::mock::MockCluster`].

use crate::errors::InfraResult;
use crate::types::{ClusterTopology, LifecyclePhase, ReplicationRole, UnitId, UnitRole};

/// Captured output of one probe invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutput {
    /// Raw stdout, including any trailing newline the underlying protocol emits.
    pub stdout: Vec<u8>,
    pub exit_code: i32,
}

impl ProbeOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Issues lifecycle commands against the isolation scope.
pub trait LifecycleActor {
    /// Materialize the topology from its manifest.
    fn create(&self, topology: &ClusterTopology) -> InfraResult<()>;

    /// Delete everything the manifest created.
    fn destroy(&self, topology: &ClusterTopology) -> InfraResult<()>;

    /// Delete one named unit. The orchestrator recreates it with the same identity.
    fn delete_unit(&self, unit: &UnitId) -> InfraResult<()>;

    /// Rescale one replicated group.
    fn scale(&self, role: UnitRole, replicas: u32) -> InfraResult<()>;
}

/// Reports whether a unit is currently in an expected lifecycle phase.
///
/// The underlying checker signals purely through its exit code (0 = match),
/// so a mismatch and an unready pod are indistinguishable here; only a spawn
/// failure is an infrastructure error.
pub trait PhaseProbe {
    fn check_phase(&self, unit: &UnitId, expected: LifecyclePhase) -> InfraResult<bool>;
}

/// Runs a cache protocol command against the primary or any secondary.
pub trait DataPlaneProbe {
    fn invoke(&self, role: ReplicationRole, command: &[String]) -> InfraResult<ProbeOutput>;
}

/// Enumerates currently reachable replica addresses.
pub trait TopologyProbe {
    /// Newline-separated secondary addresses, possibly with a trailing empty line.
    fn list_secondaries(&self) -> InfraResult<String>;

    /// Newline-separated coordinator addresses, same shape.
    fn list_coordinators(&self) -> InfraResult<String>;
}

/// Everything the scenario engine needs, bundled for convenience.
pub trait Cluster: LifecycleActor + PhaseProbe + DataPlaneProbe + TopologyProbe {}

impl<T: LifecycleActor + PhaseProbe + DataPlaneProbe + TopologyProbe> Cluster for T {}
