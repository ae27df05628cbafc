//! The disruption scenario catalog.
//!
//! Each scenario is a linear `Init -> Disrupt -> Settle -> Assert -> Teardown`
//! progression. Settle windows are generous on purpose: a freshly disrupted
//! cluster needs the failover election and replication catch-up to finish
//! before its invariants are meaningful. Cache replies include the trailing
//! newline the wire protocol emits.

use std::time::Duration;

use crate::invariants::Assertion;
use crate::types::{Action, ReplicationRole, Scenario, Step, UnitId, UnitRole};

const KEY: &str = "foo";
const VALUE: &str = "bar";

/// Settle window after deleting a unit: recreation plus failover election.
const RECOVERY_SETTLE: Duration = Duration::from_secs(120);
/// Settle window after a scale command.
const SCALE_SETTLE: Duration = Duration::from_secs(60);
/// Extended settle for coordinator scale-in, which converges slowest.
const COORDINATOR_SCALE_IN_SETTLE: Duration = Duration::from_secs(120);
/// Overall budget for a single scenario run.
const SCENARIO_TIMEOUT: Duration = Duration::from_secs(900);

fn set_key() -> Assertion {
    Assertion::response(ReplicationRole::Primary, &["set", KEY, VALUE], b"OK\n".to_vec())
}

fn get_key(role: ReplicationRole) -> Assertion {
    Assertion::response(role, &["get", KEY], format!("{VALUE}\n").into_bytes())
}

fn running(unit: UnitId) -> Assertion {
    Assertion::PhaseEquals {
        unit,
        phase: crate::types::LifecyclePhase::Running,
    }
}

fn all_running(role: UnitRole, count: u32) -> Vec<Assertion> {
    (0..count).map(|ordinal| running(UnitId::new(role, ordinal))).collect()
}

/// Set, get, delete, and get-after-delete through the primary.
pub fn basic_crud() -> Scenario {
    Scenario {
        name: "basic-crud".to_string(),
        description: "Key-value round-trip and delete through the primary".to_string(),
        timeout: SCENARIO_TIMEOUT,
        steps: vec![Step {
            name: "crud".to_string(),
            action: None,
            settle: Duration::ZERO,
            assertions: vec![
                set_key(),
                get_key(ReplicationRole::Primary),
                Assertion::response(ReplicationRole::Primary, &["del", KEY], b"1\n".to_vec()),
                Assertion::response(ReplicationRole::Primary, &["get", KEY], b"\n".to_vec()),
            ],
        }],
    }
}

/// Write a value, kill the primary-bearing unit, and expect the same identity
/// back in `Running` with the value still resolvable.
pub fn primary_restart_durability() -> Scenario {
    let server0 = UnitId::server(0);
    Scenario {
        name: "primary-restart-durability".to_string(),
        description: "Data survives deletion of the primary-bearing unit".to_string(),
        timeout: SCENARIO_TIMEOUT,
        steps: vec![
            Step {
                name: "seed".to_string(),
                action: None,
                settle: Duration::ZERO,
                assertions: vec![set_key(), get_key(ReplicationRole::Primary)],
            },
            Step {
                name: "delete-primary-unit".to_string(),
                action: Some(Action::DeleteUnit(server0)),
                settle: RECOVERY_SETTLE,
                assertions: vec![running(server0), get_key(ReplicationRole::Primary)],
            },
        ],
    }
}

/// A value written through the primary is observable through a secondary.
pub fn secondary_read() -> Scenario {
    Scenario {
        name: "secondary-read".to_string(),
        description: "Cross-role read consistency".to_string(),
        timeout: SCENARIO_TIMEOUT,
        steps: vec![Step {
            name: "write-then-read-secondary".to_string(),
            action: None,
            settle: Duration::ZERO,
            assertions: vec![set_key(), get_key(ReplicationRole::Secondary)],
        }],
    }
}

/// Delete the first data-plane unit; its identity must resume `Running`.
pub fn server_restart() -> Scenario {
    let server0 = UnitId::server(0);
    Scenario {
        name: "server-restart".to_string(),
        description: "Stable identity recovery of a deleted data-plane unit".to_string(),
        timeout: SCENARIO_TIMEOUT,
        steps: vec![Step {
            name: "delete-server-0".to_string(),
            action: Some(Action::DeleteUnit(server0)),
            settle: RECOVERY_SETTLE,
            assertions: vec![running(server0)],
        }],
    }
}

/// Delete a coordinator unit; recovery must not need data-plane involvement.
pub fn coordinator_restart() -> Scenario {
    let coordinator0 = UnitId::coordinator(0);
    Scenario {
        name: "coordinator-restart".to_string(),
        description: "Stable identity recovery of a deleted coordinator unit".to_string(),
        timeout: SCENARIO_TIMEOUT,
        steps: vec![Step {
            name: "delete-coordinator-0".to_string(),
            action: Some(Action::DeleteUnit(coordinator0)),
            settle: RECOVERY_SETTLE,
            assertions: vec![running(coordinator0)],
        }],
    }
}

/// Grow the data plane to 5, verify every ordinal, shrink back to 3, verify
/// the survivors and the secondary count.
pub fn server_scale_out_in() -> Scenario {
    Scenario {
        name: "server-scale-out-in".to_string(),
        description: "Data-plane scale-out then scale-in".to_string(),
        timeout: SCENARIO_TIMEOUT,
        steps: vec![
            Step {
                name: "scale-out-to-5".to_string(),
                action: Some(Action::Scale {
                    role: UnitRole::Server,
                    replicas: 5,
                }),
                settle: SCALE_SETTLE,
                assertions: all_running(UnitRole::Server, 5),
            },
            Step {
                name: "scale-in-to-3".to_string(),
                action: Some(Action::Scale {
                    role: UnitRole::Server,
                    replicas: 3,
                }),
                settle: SCALE_SETTLE,
                assertions: {
                    let mut assertions = all_running(UnitRole::Server, 3);
                    assertions.push(Assertion::ReplicaCountEquals(2));
                    assertions
                },
            },
        ],
    }
}

/// Same shape on the coordinator plane, asserting quorum membership shrinks.
///
/// Regression guard: coordinator scale-in has historically failed to reset
/// the quorum membership, leaving stale members behind. Asserted, never
/// assumed.
pub fn coordinator_scale_out_in() -> Scenario {
    Scenario {
        name: "coordinator-scale-out-in".to_string(),
        description: "Coordinator scale-out then scale-in with quorum shrink".to_string(),
        timeout: SCENARIO_TIMEOUT,
        steps: vec![
            Step {
                name: "scale-out-to-5".to_string(),
                action: Some(Action::Scale {
                    role: UnitRole::Coordinator,
                    replicas: 5,
                }),
                settle: SCALE_SETTLE,
                assertions: all_running(UnitRole::Coordinator, 5),
            },
            Step {
                name: "scale-in-to-3".to_string(),
                action: Some(Action::Scale {
                    role: UnitRole::Coordinator,
                    replicas: 3,
                }),
                settle: COORDINATOR_SCALE_IN_SETTLE,
                assertions: {
                    let mut assertions = all_running(UnitRole::Coordinator, 3);
                    assertions.push(Assertion::QuorumSizeEquals(3));
                    assertions
                },
            },
        ],
    }
}

/// Every scenario, in execution order.
pub fn all() -> Vec<Scenario> {
    vec![
        basic_crud(),
        primary_restart_durability(),
        secondary_read(),
        server_restart(),
        coordinator_restart(),
        server_scale_out_in(),
        coordinator_scale_out_in(),
    ]
}

/// Look up one scenario by name.
pub fn by_name(name: &str) -> Option<Scenario> {
    all().into_iter().find(|scenario| scenario.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique() {
        let scenarios = all();
        let mut names: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), scenarios.len());
    }

    #[test]
    fn lookup_by_name_round_trips() {
        for scenario in all() {
            assert_eq!(by_name(&scenario.name).unwrap(), scenario);
        }
        assert!(by_name("no-such-scenario").is_none());
    }

    #[test]
    fn durability_scenario_matches_documented_shape() {
        let scenario = primary_restart_durability();
        assert_eq!(scenario.steps.len(), 2);
        let disrupt = &scenario.steps[1];
        assert_eq!(
            disrupt.action,
            Some(Action::DeleteUnit(UnitId::server(0)))
        );
        assert_eq!(disrupt.settle, Duration::from_secs(120));
        assert_eq!(disrupt.assertions[0], running(UnitId::server(0)));
    }

    #[test]
    fn scale_in_asserts_the_shrunk_counts() {
        let server = server_scale_out_in();
        let last = server.steps.last().unwrap();
        assert!(last.assertions.contains(&Assertion::ReplicaCountEquals(2)));

        let coordinator = coordinator_scale_out_in();
        let last = coordinator.steps.last().unwrap();
        assert!(last.assertions.contains(&Assertion::QuorumSizeEquals(3)));
    }
}
