//! Configuration loading
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, `WARD_CONFIG_PATH`, or `./ward.toml` if present)
//! 3. Environment variables prefixed with `WARD_`, e.g. `WARD_SANDBOX__QUANTUM=500`
//! 4. Explicit builder overrides (CLI flags)
//!
//! A `.env` file in the working directory is loaded first, so it can supply any of
//! the environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sandbox::budget::{DEFAULT_CEILING, DEFAULT_QUANTUM};
use crate::sandbox::Budget;

const DEFAULT_CONFIG_FILE: &str = "ward.toml";
const DEFAULT_STAGGER_MS: u64 = 1000;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub driver: DriverConfig,
}

/// Instruction budget settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Guest instructions between budget hook firings
    pub quantum: u32,
    /// Cumulative instructions after which a script is terminated
    pub ceiling: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            ceiling: DEFAULT_CEILING,
        }
    }
}

impl SandboxConfig {
    pub fn budget(&self) -> Budget {
        Budget::new(self.quantum, self.ceiling)
    }
}

/// Driver loop settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Delay between successive `run()` calls on a script
    pub stagger_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            stagger_ms: DEFAULT_STAGGER_MS,
        }
    }
}

impl DriverConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

impl Config {
    /// Load configuration from the default sources
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.sandbox
            .budget()
            .validate()
            .context("Invalid [sandbox] settings")?;
        Ok(())
    }
}

/// Builder for layered configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    skip_env: bool,
    quantum: Option<u32>,
    ceiling: Option<u64>,
    stagger_ms: Option<u64>,
}

impl ConfigBuilder {
    /// Explicit config file; unlike the default file it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Ignore `.env` and `WARD_*` variables (used by tests)
    pub fn skip_env(mut self, skip: bool) -> Self {
        self.skip_env = skip;
        self
    }

    pub fn quantum(mut self, quantum: Option<u32>) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn ceiling(mut self, ceiling: Option<u64>) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn stagger_ms(mut self, stagger_ms: Option<u64>) -> Self {
        self.stagger_ms = stagger_ms;
        self
    }

    pub fn build(self) -> Result<Config> {
        if !self.skip_env {
            dotenvy::dotenv().ok();
        }

        let env_path = if self.skip_env {
            None
        } else {
            std::env::var("WARD_CONFIG_PATH").ok().map(PathBuf::from)
        };
        let (path, required) = match self.config_path.or(env_path) {
            Some(path) => (path, true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut builder = config::Config::builder()
            .set_default("sandbox.quantum", i64::from(DEFAULT_QUANTUM))?
            .set_default("sandbox.ceiling", DEFAULT_CEILING as i64)?
            .set_default("driver.stagger_ms", DEFAULT_STAGGER_MS as i64)?
            .add_source(config::File::from(path.clone()).required(required));

        if !self.skip_env {
            builder = builder.add_source(
                config::Environment::with_prefix("WARD")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        if let Some(quantum) = self.quantum {
            builder = builder.set_override("sandbox.quantum", i64::from(quantum))?;
        }
        if let Some(ceiling) = self.ceiling {
            builder = builder.set_override("sandbox.ceiling", ceiling as i64)?;
        }
        if let Some(stagger_ms) = self.stagger_ms {
            builder = builder.set_override("driver.stagger_ms", stagger_ms as i64)?;
        }

        let config: Config = builder
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }
}
