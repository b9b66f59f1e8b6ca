//! Network-isolated sandbox provisioning for tinynet.
//!
//! This crate turns an image reference into a running container that has no
//! network stack, and returns the container id together with the engine's
//! network-sandbox key (the path of the container's network namespace). A
//! topology builder uses that key to plug virtual interfaces into the
//! container afterwards.
//!
//! ```no_run
//! # async fn run() -> tinynet_sandbox::Result<()> {
//! let handle = tinynet_sandbox::provision("busybox:latest").await?;
//! println!("{} -> {}", handle.unit_id, handle.namespace_key);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod progress;
pub mod provisioner;
pub mod unit;

pub use config::{EngineConfig, ProvisionConfig, PullPolicy};
pub use docker::DockerEngine;
pub use engine::{ContainerEngine, PullProgress};
pub use error::{EngineError, ProvisionError, ProvisionStage, Result};
pub use progress::{ProvisionPhase, ProvisionStatus};
pub use provisioner::{ProvisionRequest, SandboxProvisioner, provision};
pub use unit::{KeepAliveStrategy, SandboxHandle, UnitSpec};

pub const NETWORK_MODE_NONE: &str = "none";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 86_400;
pub const CLEANUP_TIMEOUT_SECS: u64 = 30;
