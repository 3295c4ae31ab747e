//! Session configuration
//!
//! Configuration is plain owned data handed to the session at construction;
//! nothing here is process-global. Files are TOML, discovered at the usual
//! platform locations, and every field has a serde default so a minimal
//! config only needs the account id.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::poll::strategy::{PollState, PollStrategy};
use crate::types::error::{BridgeError, Result};

/// Strategies for one tracked resource, keyed by presence state
///
/// In a partially written config table the `active` state falls back to the
/// message-cadence default; `idle` and `dnd` left unlisted do not poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    #[serde(default = "default_active_strategy")]
    pub active: PollStrategy,

    #[serde(default = "default_idle_strategy")]
    pub idle: PollStrategy,

    #[serde(default = "default_dnd_strategy")]
    pub dnd: PollStrategy,
}

impl ResourcePolicy {
    pub fn strategy(&self, state: PollState) -> &PollStrategy {
        match state {
            PollState::Active => &self.active,
            PollState::Idle => &self.idle,
            PollState::DoNotDisturb => &self.dnd,
        }
    }

    pub fn strategy_mut(&mut self, state: PollState) -> &mut PollStrategy {
        match state {
            PollState::Active => &mut self.active,
            PollState::Idle => &mut self.idle,
            PollState::DoNotDisturb => &mut self.dnd,
        }
    }

    /// Cold reset every strategy so all are well defined before first use.
    pub fn reset_all_cold(&mut self) {
        self.active.reset_cold();
        self.idle.reset_cold();
        self.dnd.reset_cold();
    }

    /// Default cadence for message-like resources: quick burst while
    /// active, gentle backoff while idle, silence in do-not-disturb.
    pub fn messages() -> Self {
        Self {
            active: PollStrategy::n_times(vec![15, 30, 60], 300),
            idle: PollStrategy::geometric(30, 30, 1800),
            dnd: PollStrategy::Nop,
        }
    }

    /// Default cadence for the addressbook: a slow constant refresh while
    /// active, nothing otherwise.
    pub fn contacts() -> Self {
        Self {
            active: PollStrategy::constant(3600),
            idle: PollStrategy::Nop,
            dnd: PollStrategy::Nop,
        }
    }
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self::messages()
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Remote account identifier, also used to name cache files
    #[serde(default)]
    pub account: String,

    /// Worker threads for blocking fetches
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Ceiling in seconds beyond which no poll timer is scheduled
    #[serde(default = "default_max_poll_delay")]
    pub max_poll_delay_secs: u64,

    /// Directory for persisted resource caches; platform cache dir when
    /// unset
    pub cache_dir: Option<PathBuf>,

    /// Build tag stamped into persisted caches
    #[serde(default = "default_build")]
    pub build: String,

    #[serde(default = "ResourcePolicy::messages")]
    pub texts: ResourcePolicy,

    #[serde(default = "ResourcePolicy::messages")]
    pub voicemail: ResourcePolicy,

    #[serde(default = "ResourcePolicy::contacts")]
    pub contacts: ResourcePolicy,
}

fn default_workers() -> usize {
    4
}

fn default_max_poll_delay() -> u64 {
    24 * 60 * 60
}

fn default_build() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_active_strategy() -> PollStrategy {
    ResourcePolicy::messages().active
}

fn default_idle_strategy() -> PollStrategy {
    PollStrategy::Nop
}

fn default_dnd_strategy() -> PollStrategy {
    PollStrategy::Nop
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            workers: default_workers(),
            max_poll_delay_secs: default_max_poll_delay(),
            cache_dir: None,
            build: default_build(),
            texts: ResourcePolicy::messages(),
            voicemail: ResourcePolicy::messages(),
            contacts: ResourcePolicy::contacts(),
        }
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("voicebridge").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("voicebridge")
                .join("config.toml"),
        );
    }

    paths
}

impl SessionConfig {
    /// Load configuration from the first default path that exists, falling
    /// back to defaults when none does.
    pub fn load() -> Result<Self> {
        for path in default_config_paths() {
            if path.exists() {
                info!(path = %path.display(), "loading configuration");
                return Self::load_from(&path);
            }
        }
        info!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|err| BridgeError::Config(format!("Failed to read config: {err}")))?;
        let config: SessionConfig = toml::from_str(&content)
            .map_err(|err| BridgeError::Config(format!("Failed to parse config: {err}")))?;
        Ok(config)
    }
}
