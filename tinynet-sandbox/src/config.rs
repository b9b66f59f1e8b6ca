//! Engine and provisioning configuration.
//!
//! Both structs are plain values passed to the provisioner. `from_env` reads
//! the process environment; `from_lookup` takes any key lookup so parsing can
//! be exercised without touching the environment.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_KEEP_ALIVE_SECS;
use crate::unit::KeepAliveStrategy;

/// Where the container engine lives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Engine address (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    /// `None` uses the platform default socket.
    pub docker_host: Option<String>,
}

impl EngineConfig {
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            docker_host: Some(host.into()),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            docker_host: lookup("DOCKER_HOST").filter(|v| !v.trim().is_empty()),
        }
    }
}

/// When to fetch the image before creating a unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(PullPolicy::Always),
            "if-not-present" | "ifnotpresent" | "missing" => Ok(PullPolicy::IfNotPresent),
            "never" => Ok(PullPolicy::Never),
            other => Err(format!("unknown pull policy '{other}'")),
        }
    }
}

/// Knobs for a provisioning run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub keep_alive: KeepAliveStrategy,
    pub pull_policy: PullPolicy,
    /// Deadline for the whole run. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Remove a unit that was created but could not be fully provisioned.
    pub cleanup_on_failure: bool,
    /// Extra labels put on every created unit.
    pub labels: HashMap<String, String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            keep_alive: KeepAliveStrategy::default(),
            pull_policy: PullPolicy::default(),
            timeout: None,
            cleanup_on_failure: true,
            labels: HashMap::new(),
        }
    }
}

impl ProvisionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let keep_alive_secs = lookup("TINYNET_KEEP_ALIVE_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_KEEP_ALIVE_SECS);
        let keep_alive = match lookup("TINYNET_KEEP_ALIVE_CMD") {
            Some(cmd) if !cmd.trim().is_empty() => {
                KeepAliveStrategy::Command(cmd.split_whitespace().map(str::to_string).collect())
            }
            _ => KeepAliveStrategy::Sleep(Duration::from_secs(keep_alive_secs)),
        };
        let pull_policy = lookup("TINYNET_PULL_POLICY")
            .and_then(|v| v.parse::<PullPolicy>().ok())
            .unwrap_or_default();
        let timeout = lookup("TINYNET_PROVISION_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let cleanup_on_failure = lookup("TINYNET_CLEANUP_ON_FAILURE")
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(true);

        Self {
            keep_alive,
            pull_policy,
            timeout,
            cleanup_on_failure,
            labels: HashMap::new(),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAliveStrategy) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_pull_policy(mut self, pull_policy: PullPolicy) -> Self {
        self.pull_policy = pull_policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cleanup_on_failure(mut self, cleanup: bool) -> Self {
        self.cleanup_on_failure = cleanup;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = ProvisionConfig::from_lookup(vars(&[]));
        assert_eq!(config, ProvisionConfig::default());
        assert_eq!(EngineConfig::from_lookup(vars(&[])), EngineConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ProvisionConfig::from_lookup(vars(&[
            ("TINYNET_PULL_POLICY", "Always"),
            ("TINYNET_KEEP_ALIVE_SECS", "600"),
            ("TINYNET_PROVISION_TIMEOUT_SECS", "45"),
            ("TINYNET_CLEANUP_ON_FAILURE", "false"),
        ]));
        assert_eq!(config.pull_policy, PullPolicy::Always);
        assert_eq!(
            config.keep_alive,
            KeepAliveStrategy::Sleep(Duration::from_secs(600))
        );
        assert_eq!(config.timeout, Some(Duration::from_secs(45)));
        assert!(!config.cleanup_on_failure);

        let engine = EngineConfig::from_lookup(vars(&[("DOCKER_HOST", "tcp://10.0.0.2:2375")]));
        assert_eq!(engine.docker_host.as_deref(), Some("tcp://10.0.0.2:2375"));
    }

    #[test]
    fn keep_alive_command_wins_over_sleep() {
        let config = ProvisionConfig::from_lookup(vars(&[
            ("TINYNET_KEEP_ALIVE_SECS", "600"),
            ("TINYNET_KEEP_ALIVE_CMD", "tail -f /dev/null"),
        ]));
        assert_eq!(
            config.keep_alive,
            KeepAliveStrategy::Command(vec!["tail".into(), "-f".into(), "/dev/null".into()])
        );
    }

    #[test]
    fn garbage_values_fall_back() {
        let config = ProvisionConfig::from_lookup(vars(&[
            ("TINYNET_PULL_POLICY", "sometimes"),
            ("TINYNET_KEEP_ALIVE_SECS", "forever"),
            ("TINYNET_PROVISION_TIMEOUT_SECS", "0"),
            ("TINYNET_CLEANUP_ON_FAILURE", "yes please"),
        ]));
        assert_eq!(config, ProvisionConfig::default());
    }

    #[test]
    fn zero_keep_alive_uses_default() {
        let config = ProvisionConfig::from_lookup(vars(&[("TINYNET_KEEP_ALIVE_SECS", "0")]));
        assert_eq!(config.keep_alive, KeepAliveStrategy::default());
        assert_eq!(
            config.keep_alive.command(),
            Some(vec!["sleep".to_string(), DEFAULT_KEEP_ALIVE_SECS.to_string()])
        );
    }

    #[test]
    fn builder_methods_compose() {
        let config = ProvisionConfig::default()
            .with_pull_policy(PullPolicy::Never)
            .with_timeout(Duration::from_secs(3))
            .with_cleanup_on_failure(false)
            .with_keep_alive(KeepAliveStrategy::ImageDefault)
            .with_label("topology", "ring");
        assert_eq!(config.pull_policy, PullPolicy::Never);
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
        assert!(!config.cleanup_on_failure);
        assert_eq!(config.keep_alive, KeepAliveStrategy::ImageDefault);
        assert_eq!(config.labels.get("topology").map(String::as_str), Some("ring"));
    }
}
