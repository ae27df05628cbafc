//! In-memory fake cluster for engine and invariant tests.
//!
//! Implements all four probe capabilities plus the lifecycle actor without
//! any live infrastructure. Convergence is modeled as a per-unit lag: after
//! creation or a disruption a unit answers `Pending` for the first N phase
//! probes, then `Running`. A `retain_stale_quorum` switch reproduces the
//! upstream coordinator scale-in bug where membership never shrinks.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::{InfraError, InfraResult};
use crate::probe::{DataPlaneProbe, LifecycleActor, PhaseProbe, ProbeOutput, TopologyProbe};
use crate::types::{ClusterTopology, LifecyclePhase, ReplicationRole, UnitId, UnitRole};

#[derive(Debug, Clone)]
struct UnitState {
    /// Phase probes remaining before this unit reports `Running`.
    lag_remaining: u32,
}

#[derive(Debug, Default)]
struct State {
    created: bool,
    units: HashMap<String, UnitState>,
    server_replicas: u32,
    quorum_members: Vec<String>,
    kv: HashMap<String, String>,
    /// Secondary reads that still serve the pre-replication view.
    stale_secondary_reads: u32,
    /// Ordered record of lifecycle calls, for teardown assertions.
    lifecycle_log: Vec<String>,
}

/// Builder-configured fake cluster.
#[derive(Debug)]
pub struct MockCluster {
    state: Mutex<State>,
    convergence_lag: u32,
    retain_stale_quorum: bool,
    trailing_newline: bool,
    fail_topology_probe: bool,
    data_plane_exit_code: Option<i32>,
}

impl MockCluster {
    pub fn builder() -> MockClusterBuilder {
        MockClusterBuilder::default()
    }

    /// A cluster that converges instantly and has no simulated defects.
    pub fn healthy() -> Self {
        Self::builder().build()
    }

    /// Ordered lifecycle calls seen so far (`create`, `delete cache-server-0`, ...).
    pub fn lifecycle_log(&self) -> Vec<String> {
        self.state.lock().unwrap().lifecycle_log.clone()
    }

    /// Current value for a key, if the cluster holds one.
    pub fn value_of(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().kv.get(key).cloned()
    }

    fn secondary_address(ordinal: u32) -> String {
        format!("10.244.0.{}", 10 + ordinal)
    }

    fn coordinator_address(ordinal: u32) -> String {
        format!("10.244.1.{}", 10 + ordinal)
    }

    fn listing(&self, addresses: &[String]) -> String {
        let mut raw = addresses.join("\n");
        if self.trailing_newline && !raw.is_empty() {
            raw.push('\n');
        }
        raw
    }

    fn reply(bytes: impl Into<Vec<u8>>) -> ProbeOutput {
        ProbeOutput {
            stdout: bytes.into(),
            exit_code: 0,
        }
    }
}

impl LifecycleActor for MockCluster {
    fn create(&self, topology: &ClusterTopology) -> InfraResult<()> {
        let mut state = self.state.lock().unwrap();
        state.created = true;
        state.server_replicas = topology.server_replicas;
        state.units = topology
            .units()
            .map(|unit| {
                (
                    unit.name(),
                    UnitState {
                        lag_remaining: self.convergence_lag,
                    },
                )
            })
            .collect();
        state.quorum_members = (0..topology.coordinator_replicas)
            .map(Self::coordinator_address)
            .collect();
        state.lifecycle_log.push("create".to_string());
        Ok(())
    }

    fn destroy(&self, _topology: &ClusterTopology) -> InfraResult<()> {
        let mut state = self.state.lock().unwrap();
        state.created = false;
        state.units.clear();
        state.quorum_members.clear();
        state.lifecycle_log.push("destroy".to_string());
        Ok(())
    }

    fn delete_unit(&self, unit: &UnitId) -> InfraResult<()> {
        let mut state = self.state.lock().unwrap();
        state.lifecycle_log.push(format!("delete {unit}"));
        // The orchestrator recreates the unit under the same identity; it
        // just has to converge again. Data survives on the replicas.
        if let Some(entry) = state.units.get_mut(&unit.name()) {
            entry.lag_remaining = self.convergence_lag;
        }
        Ok(())
    }

    fn scale(&self, role: UnitRole, replicas: u32) -> InfraResult<()> {
        let mut state = self.state.lock().unwrap();
        state.lifecycle_log.push(format!("scale {role} {replicas}"));

        let survivors: Vec<String> = (0..replicas)
            .map(|ordinal| UnitId::new(role, ordinal).name())
            .collect();
        state
            .units
            .retain(|name, _| !name.starts_with(role.group_name()) || survivors.contains(name));
        for name in survivors {
            state.units.entry(name).or_insert(UnitState {
                lag_remaining: self.convergence_lag,
            });
        }

        match role {
            UnitRole::Server => state.server_replicas = replicas,
            UnitRole::Coordinator => {
                let current = state.quorum_members.len() as u32;
                if replicas >= current {
                    for ordinal in current..replicas {
                        state.quorum_members.push(Self::coordinator_address(ordinal));
                    }
                } else if !self.retain_stale_quorum {
                    state.quorum_members.truncate(replicas as usize);
                }
                // retain_stale_quorum: membership keeps the departed
                // coordinators, reproducing the scale-in reset bug.
            }
        }
        Ok(())
    }
}

impl PhaseProbe for MockCluster {
    fn check_phase(&self, unit: &UnitId, expected: LifecyclePhase) -> InfraResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.units.get_mut(&unit.name()) else {
            // Absent unit: nothing to match, whatever was expected.
            return Ok(false);
        };
        let phase = if entry.lag_remaining > 0 {
            // Lag burns only when a probe asks whether the unit is Running
            // yet; probes for other phases are observational and do not
            // advance convergence.
            if expected == LifecyclePhase::Running {
                entry.lag_remaining -= 1;
            }
            LifecyclePhase::Pending
        } else {
            LifecyclePhase::Running
        };
        Ok(phase == expected)
    }
}

impl DataPlaneProbe for MockCluster {
    fn invoke(&self, role: ReplicationRole, command: &[String]) -> InfraResult<ProbeOutput> {
        if let Some(exit_code) = self.data_plane_exit_code {
            return Ok(ProbeOutput {
                stdout: Vec::new(),
                exit_code,
            });
        }

        let mut state = self.state.lock().unwrap();
        let words: Vec<&str> = command.iter().map(String::as_str).collect();
        let output = match words.as_slice() {
            ["set", key, value] => {
                state.kv.insert(key.to_string(), value.to_string());
                Self::reply(b"OK\n".to_vec())
            }
            ["get", key] => {
                let stale = role == ReplicationRole::Secondary && state.stale_secondary_reads > 0;
                if stale {
                    state.stale_secondary_reads -= 1;
                    Self::reply(b"\n".to_vec())
                } else {
                    match state.kv.get(*key) {
                        Some(value) => Self::reply(format!("{value}\n").into_bytes()),
                        None => Self::reply(b"\n".to_vec()),
                    }
                }
            }
            ["del", key] => {
                let removed = state.kv.remove(*key).is_some();
                Self::reply(if removed { b"1\n".to_vec() } else { b"0\n".to_vec() })
            }
            _ => Self::reply(b"ERR unknown command\n".to_vec()),
        };
        Ok(output)
    }
}

impl TopologyProbe for MockCluster {
    fn list_secondaries(&self) -> InfraResult<String> {
        if self.fail_topology_probe {
            return Err(InfraError::CommandFailed {
                command: "list-secondary-addrs".to_string(),
                exit_code: 1,
            });
        }
        let state = self.state.lock().unwrap();
        let addresses: Vec<String> = (1..state.server_replicas)
            .map(Self::secondary_address)
            .collect();
        Ok(self.listing(&addresses))
    }

    fn list_coordinators(&self) -> InfraResult<String> {
        if self.fail_topology_probe {
            return Err(InfraError::CommandFailed {
                command: "list-coordinator-addrs".to_string(),
                exit_code: 1,
            });
        }
        let state = self.state.lock().unwrap();
        Ok(self.listing(&state.quorum_members))
    }
}

#[derive(Debug, Default)]
pub struct MockClusterBuilder {
    convergence_lag: u32,
    retain_stale_quorum: bool,
    no_trailing_newline: bool,
    fail_topology_probe: bool,
    data_plane_exit_code: Option<i32>,
    stale_secondary_reads: u32,
}

impl MockClusterBuilder {
    /// Phase probes a unit answers `Pending` before reaching `Running`.
    pub fn convergence_lag(mut self, probes: u32) -> Self {
        self.convergence_lag = probes;
        self
    }

    /// Reproduce the coordinator scale-in bug: quorum membership never shrinks.
    pub fn retain_stale_quorum(mut self) -> Self {
        self.retain_stale_quorum = true;
        self
    }

    /// Suppress the trailing-empty-line listing artifact.
    pub fn without_trailing_newline(mut self) -> Self {
        self.no_trailing_newline = true;
        self
    }

    /// Make both topology listings exit non-zero.
    pub fn fail_topology_probe(mut self) -> Self {
        self.fail_topology_probe = true;
        self
    }

    /// Force every data-plane invocation to exit with this code.
    pub fn data_plane_exit_code(mut self, exit_code: i32) -> Self {
        self.data_plane_exit_code = Some(exit_code);
        self
    }

    /// Number of secondary reads that still see the pre-replication view.
    pub fn stale_secondary_reads(mut self, reads: u32) -> Self {
        self.stale_secondary_reads = reads;
        self
    }

    pub fn build(self) -> MockCluster {
        MockCluster {
            state: Mutex::new(State {
                stale_secondary_reads: self.stale_secondary_reads,
                ..State::default()
            }),
            convergence_lag: self.convergence_lag,
            retain_stale_quorum: self.retain_stale_quorum,
            trailing_newline: !self.no_trailing_newline,
            fail_topology_probe: self.fail_topology_probe,
            data_plane_exit_code: self.data_plane_exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> ClusterTopology {
        ClusterTopology::new("default", 3, 3)
    }

    #[test]
    fn units_converge_after_the_configured_lag() {
        let cluster = MockCluster::builder().convergence_lag(2).build();
        cluster.create(&topology()).unwrap();
        let unit = UnitId::server(0);

        assert!(!cluster.check_phase(&unit, LifecyclePhase::Running).unwrap());
        assert!(cluster.check_phase(&unit, LifecyclePhase::Pending).unwrap());
        assert!(!cluster.check_phase(&unit, LifecyclePhase::Running).unwrap());
        assert!(cluster.check_phase(&unit, LifecyclePhase::Running).unwrap());
    }

    #[test]
    fn non_running_probes_do_not_consume_the_lag_budget() {
        let cluster = MockCluster::builder().convergence_lag(1).build();
        cluster.create(&topology()).unwrap();
        let unit = UnitId::server(0);

        for _ in 0..10 {
            assert!(cluster.check_phase(&unit, LifecyclePhase::Pending).unwrap());
        }
        assert!(!cluster.check_phase(&unit, LifecyclePhase::Running).unwrap());
        assert!(cluster.check_phase(&unit, LifecyclePhase::Running).unwrap());
    }

    #[test]
    fn delete_resets_convergence_but_keeps_identity() {
        let cluster = MockCluster::builder().convergence_lag(1).build();
        cluster.create(&topology()).unwrap();
        let unit = UnitId::server(0);
        cluster.check_phase(&unit, LifecyclePhase::Running).unwrap();
        assert!(cluster.check_phase(&unit, LifecyclePhase::Running).unwrap());

        cluster.delete_unit(&unit).unwrap();
        assert!(!cluster.check_phase(&unit, LifecyclePhase::Running).unwrap());
        assert!(cluster.check_phase(&unit, LifecyclePhase::Running).unwrap());
    }

    #[test]
    fn data_survives_unit_deletion() {
        let cluster = MockCluster::healthy();
        cluster.create(&topology()).unwrap();
        cluster
            .invoke(
                ReplicationRole::Primary,
                &["set".to_string(), "foo".to_string(), "bar".to_string()],
            )
            .unwrap();
        cluster.delete_unit(&UnitId::server(0)).unwrap();
        assert_eq!(cluster.value_of("foo").as_deref(), Some("bar"));
    }

    #[test]
    fn listings_carry_the_trailing_artifact_by_default() {
        let cluster = MockCluster::healthy();
        cluster.create(&topology()).unwrap();
        let raw = cluster.list_secondaries().unwrap();
        assert!(raw.ends_with('\n'));
        assert_eq!(crate::invariants::parse_address_list(&raw).len(), 2);

        let bare = MockCluster::builder().without_trailing_newline().build();
        bare.create(&topology()).unwrap();
        assert!(!bare.list_secondaries().unwrap().ends_with('\n'));
    }

    #[test]
    fn stale_quorum_switch_keeps_departed_members() {
        let buggy = MockCluster::builder().retain_stale_quorum().build();
        buggy.create(&topology()).unwrap();
        buggy.scale(UnitRole::Coordinator, 5).unwrap();
        buggy.scale(UnitRole::Coordinator, 3).unwrap();
        let raw = buggy.list_coordinators().unwrap();
        assert_eq!(crate::invariants::parse_address_list(&raw).len(), 5);

        let fixed = MockCluster::healthy();
        fixed.create(&topology()).unwrap();
        fixed.scale(UnitRole::Coordinator, 5).unwrap();
        fixed.scale(UnitRole::Coordinator, 3).unwrap();
        let raw = fixed.list_coordinators().unwrap();
        assert_eq!(crate::invariants::parse_address_list(&raw).len(), 3);
    }

    #[test]
    fn scale_in_removes_high_ordinals_only() {
        let cluster = MockCluster::healthy();
        cluster.create(&topology()).unwrap();
        cluster.scale(UnitRole::Server, 5).unwrap();
        assert!(
            cluster
                .check_phase(&UnitId::server(4), LifecyclePhase::Running)
                .unwrap()
        );
        cluster.scale(UnitRole::Server, 3).unwrap();
        assert!(
            !cluster
                .check_phase(&UnitId::server(4), LifecyclePhase::Running)
                .unwrap()
        );
        assert!(
            cluster
                .check_phase(&UnitId::coordinator(2), LifecyclePhase::Running)
                .unwrap()
        );
    }
}
