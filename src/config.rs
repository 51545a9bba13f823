//! Layered configuration: built-in defaults, then an optional TOML file, then environment
//! variables.
//!
//! Environment variables are prefixed with `STARWATCH_`; a double underscore separates
//! nested keys:
//! - `STARWATCH_POLL_INTERVAL_SECS=30` sets `poll_interval_secs`
//! - `STARWATCH_STATE_FILE=/var/lib/star-watch/state.json` sets `state_file`
//! - `STARWATCH_MILESTONES__100="Triple digits!"` sets `milestones."100"`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::extract::DEFAULT_VALUE_PATTERN;
use crate::notify::MessageTemplate;
use crate::poller::PollParameters;

pub const ENV_PREFIX: &str = "STARWATCH_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Seconds between two polling ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound in seconds for one page fetch or notification send.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Where to persist the watch list.  Kept in memory only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Regular expression whose first capture group is the watched value.
    #[serde(default = "default_value_pattern")]
    pub value_pattern: String,

    /// Custom notification texts keyed by the exact value that triggers them.
    #[serde(default)]
    pub milestones: HashMap<String, String>,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_value_pattern() -> String {
    DEFAULT_VALUE_PATTERN.to_string()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            state_file: None,
            value_pattern: default_value_pattern(),
            milestones: HashMap::new(),
        }
    }
}

impl WatchConfig {
    /// Defaults overridden by the environment.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(None).extract().map_err(Box::new)
    }

    /// Defaults overridden by the TOML file at `path` (if it exists), then the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(Some(path.as_ref())).extract().map_err(Box::new)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(WatchConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn poll_parameters(&self) -> anyhow::Result<PollParameters> {
        PollParameters::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.fetch_timeout_secs),
            self.max_concurrent_fetches,
        )
    }

    pub fn message_template(&self) -> MessageTemplate {
        MessageTemplate::with_milestones(self.milestones.clone())
    }
}
