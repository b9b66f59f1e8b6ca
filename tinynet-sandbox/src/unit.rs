//! Execution unit types: what gets created and what the caller gets back.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_KEEP_ALIVE_SECS, NETWORK_MODE_NONE};

/// Label set on every unit this crate creates.
pub const MANAGED_LABEL: &str = "tinynet.managed";
/// Label carrying the id of the provisioning run that created the unit.
pub const PROVISION_ID_LABEL: &str = "tinynet.provision-id";

/// How a unit is kept running until somebody tears it down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepAliveStrategy {
    /// Run `sleep <secs>` as the unit's command. Rounded up to whole seconds,
    /// never less than one.
    Sleep(Duration),
    /// Run an explicit command.
    Command(Vec<String>),
    /// Keep the image's own entrypoint/cmd.
    ImageDefault,
}

impl Default for KeepAliveStrategy {
    fn default() -> Self {
        KeepAliveStrategy::Sleep(Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS))
    }
}

impl KeepAliveStrategy {
    /// Command override for the unit, `None` to leave the image default.
    pub fn command(&self) -> Option<Vec<String>> {
        match self {
            KeepAliveStrategy::Sleep(duration) => {
                Some(vec!["sleep".to_string(), sleep_secs(*duration).to_string()])
            }
            KeepAliveStrategy::Command(cmd) if !cmd.is_empty() => Some(cmd.clone()),
            KeepAliveStrategy::Command(_) | KeepAliveStrategy::ImageDefault => None,
        }
    }
}

fn sleep_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

/// Creation request handed to the engine.
///
/// Only [`UnitSpec::isolated`] builds one, so `network_mode` is always `none`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitSpec {
    image: String,
    command: Option<Vec<String>>,
    network_mode: &'static str,
    labels: HashMap<String, String>,
}

impl UnitSpec {
    /// A unit with no network stack, unnamed, kept alive by `keep_alive`.
    pub fn isolated(
        image: &str,
        keep_alive: &KeepAliveStrategy,
        labels: HashMap<String, String>,
    ) -> Self {
        Self {
            image: image.to_string(),
            command: keep_alive.command(),
            network_mode: NETWORK_MODE_NONE,
            labels,
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn command(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    pub fn network_mode(&self) -> &str {
        self.network_mode
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }
}

/// A running, network-isolated unit. Ownership passes to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Engine-assigned container id.
    pub unit_id: String,
    /// Path of the unit's network namespace, e.g. `/var/run/docker/netns/3f2a...`.
    pub namespace_key: String,
}

/// Labels for a new unit: configured labels first, then the crate's own.
pub(crate) fn unit_labels(
    configured: &HashMap<String, String>,
    provision_id: &str,
) -> HashMap<String, String> {
    let mut labels = configured.clone();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(PROVISION_ID_LABEL.to_string(), provision_id.to_string());
    labels
}
