//! Common types used across CHV components.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which replicated group a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRole {
    /// Data-plane cache replica.
    Server,
    /// Quorum coordinator replica.
    Coordinator,
}

impl UnitRole {
    /// Stable name of the replicated group this role maps to.
    pub fn group_name(&self) -> &'static str {
        match self {
            Self::Server => "cache-server",
            Self::Coordinator => "cache-coordinator",
        }
    }

    /// Orchestrator resource identifier used for scale commands.
    pub fn resource(&self) -> String {
        format!("statefulset/{}", self.group_name())
    }
}

impl fmt::Display for UnitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

/// Stable identity of one replica: `<group>-<ordinal>`.
///
/// Identity survives deletion-and-recreation of the underlying pod; most
/// disruption scenarios rely on exactly this property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId {
    pub role: UnitRole,
    pub ordinal: u32,
}

impl UnitId {
    pub fn new(role: UnitRole, ordinal: u32) -> Self {
        Self { role, ordinal }
    }

    pub fn server(ordinal: u32) -> Self {
        Self::new(UnitRole::Server, ordinal)
    }

    pub fn coordinator(ordinal: u32) -> Self {
        Self::new(UnitRole::Coordinator, ordinal)
    }

    /// Pod name as the orchestrator sees it.
    pub fn name(&self) -> String {
        format!("{}-{}", self.role.group_name(), self.ordinal)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role.group_name(), self.ordinal)
    }
}

/// Pod lifecycle phase as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl LifecyclePhase {
    /// Canonical orchestrator spelling (`Running`, not `running`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecyclePhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "Unknown" => Ok(Self::Unknown),
            other => Err(format!("unrecognized lifecycle phase: {other}")),
        }
    }
}

/// Writable primary vs. read-only secondary on the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationRole {
    Primary,
    Secondary,
}

impl fmt::Display for ReplicationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Declared shape of the deployment under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// Isolation scope (namespace) exclusively owned by one running scenario.
    pub namespace: String,
    /// Data-plane replica count; the ordinal space is `[0, server_replicas)`.
    pub server_replicas: u32,
    /// Quorum-coordinator replica count.
    pub coordinator_replicas: u32,
}

impl ClusterTopology {
    pub fn new(namespace: impl Into<String>, server_replicas: u32, coordinator_replicas: u32) -> Self {
        Self {
            namespace: namespace.into(),
            server_replicas,
            coordinator_replicas,
        }
    }

    /// All unit identities declared by this topology.
    pub fn units(&self) -> impl Iterator<Item = UnitId> + '_ {
        (0..self.server_replicas)
            .map(UnitId::server)
            .chain((0..self.coordinator_replicas).map(UnitId::coordinator))
    }

    /// Secondary count implied by the data-plane replica count.
    pub fn expected_secondaries(&self) -> usize {
        self.server_replicas.saturating_sub(1) as usize
    }
}

/// A disruptive action performed against the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Delete one named unit; the orchestrator recreates it under the same identity.
    DeleteUnit(UnitId),
    /// Rescale one replicated group to the given count.
    Scale { role: UnitRole, replicas: u32 },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteUnit(unit) => write!(f, "delete {unit}"),
            Self::Scale { role, replicas } => write!(f, "scale {role} to {replicas}"),
        }
    }
}

/// One `{action, settle, assertions}` step of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Disruption to perform before asserting; `None` for pure-assertion steps.
    #[serde(default)]
    pub action: Option<Action>,
    /// Convergence window: assertions are polled until this deadline.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    pub assertions: Vec<crate::invariants::Assertion>,
}

/// An immutable, ordered disruption scenario. Executed exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    /// Overall budget; exceeding it is an infrastructure error, not an
    /// assertion failure.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub steps: Vec<Step>,
}

/// Serde adapter storing `Duration` as a humantime string (`"60s"`, `"2m"`).
pub(crate) mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        humantime::format_duration(*value)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_names_are_stable() {
        assert_eq!(UnitId::server(0).name(), "cache-server-0");
        assert_eq!(UnitId::coordinator(2).name(), "cache-coordinator-2");
        assert_eq!(UnitRole::Server.resource(), "statefulset/cache-server");
    }

    #[test]
    fn topology_enumerates_all_ordinals() {
        let topology = ClusterTopology::new("default", 3, 2);
        let names: Vec<String> = topology.units().map(|u| u.name()).collect();
        assert_eq!(
            names,
            vec![
                "cache-server-0",
                "cache-server-1",
                "cache-server-2",
                "cache-coordinator-0",
                "cache-coordinator-1",
            ]
        );
        assert_eq!(topology.expected_secondaries(), 2);
    }

    #[test]
    fn expected_secondaries_saturates_at_zero() {
        let topology = ClusterTopology::new("default", 0, 3);
        assert_eq!(topology.expected_secondaries(), 0);
    }

    #[test]
    fn lifecycle_phase_round_trips_through_str() {
        for phase in [
            LifecyclePhase::Pending,
            LifecyclePhase::Running,
            LifecyclePhase::Succeeded,
            LifecyclePhase::Failed,
            LifecyclePhase::Unknown,
        ] {
            assert_eq!(phase.as_str().parse::<LifecyclePhase>(), Ok(phase));
        }
        assert!("Evicted".parse::<LifecyclePhase>().is_err());
    }

    #[test]
    fn durations_serialize_as_humantime() {
        let step = Step {
            name: "settle".to_string(),
            action: None,
            settle: Duration::from_secs(120),
            assertions: Vec::new(),
        };
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"2m\""), "unexpected serialization: {json}");
        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(back.settle, Duration::from_secs(120));
    }
}
