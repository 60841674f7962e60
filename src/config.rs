use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Ledger networks the binary knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// In-process development ledger.
    Local,
}

impl FromStr for Network {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Network::Local),
            other => Err(MarketError::Configuration(format!(
                "unknown network '{other}' (known networks: local)"
            ))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Local => f.write_str("local"),
        }
    }
}

/// How long to keep polling an operation before giving up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub deadline: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            max_attempts: default_max_poll_attempts(),
            deadline: Duration::from_secs(default_confirmation_timeout_secs()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target network name; there is no default.
    pub network: Option<String>,
    /// Delay between two observations of a pending operation
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Observations before an operation is abandoned as timed out
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Wall-clock ceiling for a single operation
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Observations the local ledger needs before it includes an operation
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u32,
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_max_poll_attempts() -> u32 {
    240
}

const fn default_confirmation_timeout_secs() -> u64 {
    120
}

const fn default_confirmation_blocks() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            confirmation_blocks: default_confirmation_blocks(),
        }
    }
}

impl Config {
    /// Reads `RWA_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds a config from a variable lookup. Unset or blank variables take
    /// their defaults; values that do not parse are rejected.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());
        Ok(Self {
            network: var("RWA_NETWORK"),
            poll_interval_ms: parse_var("RWA_POLL_INTERVAL_MS", var("RWA_POLL_INTERVAL_MS"))?
                .unwrap_or_else(default_poll_interval_ms),
            max_poll_attempts: parse_var("RWA_MAX_POLL_ATTEMPTS", var("RWA_MAX_POLL_ATTEMPTS"))?
                .unwrap_or_else(default_max_poll_attempts),
            confirmation_timeout_secs: parse_var(
                "RWA_CONFIRMATION_TIMEOUT_SECS",
                var("RWA_CONFIRMATION_TIMEOUT_SECS"),
            )?
            .unwrap_or_else(default_confirmation_timeout_secs),
            confirmation_blocks: parse_var("RWA_CONFIRMATION_BLOCKS", var("RWA_CONFIRMATION_BLOCKS"))?
                .unwrap_or_else(default_confirmation_blocks),
        })
    }

    /// Resolves the configured network, failing when none was selected.
    pub fn network(&self) -> Result<Network> {
        self.network
            .as_deref()
            .ok_or_else(|| {
                MarketError::Configuration(
                    "no target network selected; pass --network or set RWA_NETWORK".to_string(),
                )
            })?
            .parse()
    }

    pub fn confirmation_policy(&self) -> Result<ConfirmationPolicy> {
        if self.max_poll_attempts == 0 {
            return Err(MarketError::Configuration(
                "max_poll_attempts must be at least 1".to_string(),
            ));
        }
        Ok(ConfirmationPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
            deadline: Duration::from_secs(self.confirmation_timeout_secs),
        })
    }
}

fn parse_var<T>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.map(|raw| {
        raw.trim().parse().map_err(|e| {
            MarketError::Configuration(format!("invalid {name} '{}': {e}", raw.trim()))
        })
    })
    .transpose()
}
