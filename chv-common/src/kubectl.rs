//! Shell-out collaborators: the orchestrator CLI and the probe scripts.
//!
//! These are thin I/O wrappers around external commands; all verification
//! logic lives in [`crate::engine`] and [`crate::invariants`]. Every command
//! runs synchronously with captured output and a hard timeout so a wedged
//! CLI cannot hang a scenario forever.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::VerifierConfig;
use crate::errors::{InfraError, InfraResult};
use crate::probe::{DataPlaneProbe, LifecycleActor, PhaseProbe, ProbeOutput, TopologyProbe};
use crate::types::{ClusterTopology, LifecyclePhase, ReplicationRole, UnitId, UnitRole};

/// Runs one external command to completion, killing it past the deadline.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Spawn, capture stdout/stderr on reader threads, and poll for exit.
    pub fn run(&self, program: &str, args: &[String]) -> InfraResult<ProbeOutput> {
        let command_line = display_command(program, args);
        debug!(command = %command_line, "executing");
        let start = Instant::now();

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| InfraError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let stdout_handle = child
            .stdout
            .take()
            .map(|mut stdout| thread::spawn(move || read_all(&mut stdout)));
        let stderr_handle = child
            .stderr
            .take()
            .map(|mut stderr| thread::spawn(move || read_all(&mut stderr)));

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if start.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            thread::sleep(Duration::from_millis(10));
        };

        let Some(exit_status) = status else {
            // Do not join the readers on this path: a grandchild spawned by
            // the command can hold the pipe's write end open for its full
            // natural lifetime, and a hard timeout must not wait for it. The
            // detached threads exit once the pipe finally closes; the output
            // is unneeded on a timeout.
            drop(stdout_handle);
            drop(stderr_handle);
            warn!(command = %command_line, timeout = ?self.timeout, "command killed after timeout");
            return Err(InfraError::CommandTimeout {
                command: command_line,
                timeout: self.timeout,
            });
        };

        let stdout = join_output(stdout_handle);
        let stderr = join_output(stderr_handle);

        // A signal-killed command has no exit code; -1 marks that case.
        let exit_code = exit_status.code().unwrap_or(-1);

        debug!(
            command = %command_line,
            exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "command completed"
        );
        if exit_code != 0 && !stderr.is_empty() {
            debug!(command = %command_line, stderr = %String::from_utf8_lossy(&stderr), "command stderr");
        }

        Ok(ProbeOutput { stdout, exit_code })
    }

    /// Run and require exit 0, mapping any other exit to an infra error.
    pub fn run_checked(&self, program: &str, args: &[String]) -> InfraResult<ProbeOutput> {
        let output = self.run(program, args)?;
        if output.success() {
            Ok(output)
        } else {
            Err(InfraError::CommandFailed {
                command: display_command(program, args),
                exit_code: output.exit_code,
            })
        }
    }
}

fn read_all<R: Read>(reader: &mut R) -> Vec<u8> {
    let mut buffer = Vec::new();
    let _ = reader.read_to_end(&mut buffer);
    buffer
}

fn join_output(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn display_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

/// Live cluster access: kubectl for lifecycle commands, the bundled probe
/// scripts for everything observational.
#[derive(Debug, Clone)]
pub struct KubectlCluster {
    kubectl: String,
    namespace: String,
    manifest: PathBuf,
    script_dir: PathBuf,
    runner: CommandRunner,
}

impl KubectlCluster {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            kubectl: config.kubectl.clone(),
            namespace: config.namespace.clone(),
            manifest: config.manifest.clone(),
            script_dir: config.script_dir.clone(),
            runner: CommandRunner::new(config.command_timeout),
        }
    }

    fn kubectl_args(&self, tail: &[String]) -> Vec<String> {
        let mut args = vec!["-n".to_string(), self.namespace.clone()];
        args.extend_from_slice(tail);
        args
    }

    fn kubectl(&self, tail: &[String]) -> InfraResult<()> {
        self.runner
            .run_checked(&self.kubectl, &self.kubectl_args(tail))?;
        Ok(())
    }

    fn script(&self, name: &str) -> String {
        self.script_dir.join(name).display().to_string()
    }

    fn listing(&self, script: &str) -> InfraResult<String> {
        let path = self.script(script);
        let output = self.runner.run_checked(&path, &[])?;
        String::from_utf8(output.stdout).map_err(|_| InfraError::MalformedOutput {
            command: path,
        })
    }
}

impl LifecycleActor for KubectlCluster {
    fn create(&self, _topology: &ClusterTopology) -> InfraResult<()> {
        self.kubectl(&[
            "create".to_string(),
            "-f".to_string(),
            self.manifest.display().to_string(),
        ])
    }

    fn destroy(&self, _topology: &ClusterTopology) -> InfraResult<()> {
        self.kubectl(&[
            "delete".to_string(),
            "-f".to_string(),
            self.manifest.display().to_string(),
        ])
    }

    fn delete_unit(&self, unit: &UnitId) -> InfraResult<()> {
        self.kubectl(&["delete".to_string(), "pod".to_string(), unit.name()])
    }

    fn scale(&self, role: UnitRole, replicas: u32) -> InfraResult<()> {
        self.kubectl(&[
            "scale".to_string(),
            format!("--replicas={replicas}"),
            role.resource(),
        ])
    }
}

impl PhaseProbe for KubectlCluster {
    fn check_phase(&self, unit: &UnitId, expected: LifecyclePhase) -> InfraResult<bool> {
        // Contract of the checker: exit 0 iff the observed phase matches.
        let output = self.runner.run(
            &self.script("check-pod-status"),
            &[
                self.namespace.clone(),
                unit.name(),
                expected.as_str().to_string(),
            ],
        )?;
        Ok(output.success())
    }
}

impl DataPlaneProbe for KubectlCluster {
    fn invoke(&self, role: ReplicationRole, command: &[String]) -> InfraResult<ProbeOutput> {
        let script = match role {
            ReplicationRole::Primary => self.script("cache-cli-primary"),
            ReplicationRole::Secondary => self.script("cache-cli-secondary"),
        };
        self.runner.run(&script, command)
    }
}

impl TopologyProbe for KubectlCluster {
    fn list_secondaries(&self) -> InfraResult<String> {
        self.listing("list-secondary-addrs")
    }

    fn list_coordinators(&self) -> InfraResult<String> {
        self.listing("list-coordinator-addrs")
    }
}

/// Verify the probe scripts exist before a run starts; a missing script is a
/// setup problem better reported up front than mid-scenario.
pub fn check_script_dir(script_dir: &Path) -> anyhow::Result<()> {
    let required = [
        "check-pod-status",
        "cache-cli-primary",
        "cache-cli-secondary",
        "list-secondary-addrs",
        "list-coordinator-addrs",
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|name| !script_dir.join(name).is_file())
        .copied()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "missing probe scripts in {}: {}",
            script_dir.display(),
            missing.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> CommandRunner {
        CommandRunner::new(Duration::from_secs(5))
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let output = runner()
            .run("sh", &["-c".to_string(), "printf 'bar\\n'".to_string()])
            .unwrap();
        assert_eq!(output.stdout, b"bar\n");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn nonzero_exit_is_preserved() {
        let output = runner()
            .run("sh", &["-c".to_string(), "exit 3".to_string()])
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[test]
    fn run_checked_maps_nonzero_exit_to_infra_error() {
        let err = runner()
            .run_checked("sh", &["-c".to_string(), "exit 2".to_string()])
            .unwrap_err();
        match err {
            InfraError::CommandFailed { exit_code, .. } => assert_eq!(exit_code, 2),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_is_an_infra_error() {
        let err = runner()
            .run("/nonexistent/chv-no-such-binary", &[])
            .unwrap_err();
        assert!(matches!(err, InfraError::Spawn { .. }));
    }

    #[test]
    fn slow_command_is_killed_at_the_deadline() {
        let runner = CommandRunner::new(Duration::from_millis(100));
        let start = Instant::now();
        let err = runner
            .run("sh", &["-c".to_string(), "sleep 30".to_string()])
            .unwrap_err();
        assert!(matches!(err, InfraError::CommandTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn timeout_is_not_blocked_by_lingering_grandchildren() {
        // The backgrounded sleep inherits the pipe's write end and outlives
        // the killed shell; the runner must still return at the deadline.
        let runner = CommandRunner::new(Duration::from_millis(100));
        let start = Instant::now();
        let err = runner
            .run("sh", &["-c".to_string(), "sleep 30 & sleep 30".to_string()])
            .unwrap_err();
        assert!(matches!(err, InfraError::CommandTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn signal_death_is_not_mislabeled() {
        let output = runner()
            .run("sh", &["-c".to_string(), "kill -9 $$".to_string()])
            .unwrap();
        assert_eq!(output.exit_code, -1);
        assert!(!output.success());
    }

    #[test]
    fn missing_scripts_are_reported_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("check-pod-status"), "#!/bin/sh\n").unwrap();
        let err = check_script_dir(dir.path()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cache-cli-primary"));
        assert!(!message.contains("check-pod-status,"));
    }
}
