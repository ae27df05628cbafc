//! Logging initialization shared by all CHV binaries.

use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter (`tracing` directive syntax).
pub const ENV_LOG: &str = "CHV_LOG";

/// How a binary wants its logging configured.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive when `CHV_LOG` is unset (e.g. `"info"`).
    pub default_level: String,
    /// Emit to stderr (stdout is reserved for report output).
    pub stderr: bool,
}

impl LogConfig {
    /// Config honoring `CHV_LOG`, falling back to the given level.
    pub fn from_env(default_level: impl Into<String>) -> Self {
        Self {
            default_level: default_level.into(),
            stderr: false,
        }
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }
}

/// Install the global subscriber. Safe to call once per process; a second
/// call (e.g. from parallel test binaries) is a no-op.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    let result = if config.stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    };

    // try_init fails when a subscriber is already installed; that is fine.
    let _ = result;
    Ok(())
}
