//! The container engine seam.
//!
//! [`ContainerEngine`] is the administrative API the provisioner drives. The
//! Docker implementation lives in [`crate::docker`]; [`mock::MockEngine`] is an
//! in-memory stand-in for tests.

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::unit::UnitSpec;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

/// One event from an image pull stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullProgress {
    /// Layer id the event refers to, if any.
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
    /// In-band error. A pull that emits one has failed.
    pub error: Option<String>,
}

impl PullProgress {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Single-line summary, e.g. `a3ed95caeb02: Downloading [==>   ] 1.2MB/3MB`.
    pub fn describe(&self) -> String {
        if let Some(error) = &self.error {
            return format!("error: {error}");
        }
        let mut line = String::new();
        if let Some(id) = &self.id {
            line.push_str(id);
            line.push_str(": ");
        }
        line.push_str(self.status.as_deref().unwrap_or(""));
        if let Some(progress) = &self.progress {
            line.push(' ');
            line.push_str(progress);
        }
        line
    }
}

/// Administrative operations on a container engine.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether `image` is already in the engine's local image store.
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

    /// Start pulling `image`. The pull is only complete once the returned
    /// stream has been read to its end.
    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<PullProgress, EngineError>>;

    /// Create a unit and return its engine-assigned id.
    async fn create_unit(&self, spec: &UnitSpec) -> Result<String, EngineError>;

    async fn start_unit(&self, unit_id: &str) -> Result<(), EngineError>;

    /// The unit's network-sandbox key, `None` if the engine did not report one.
    async fn sandbox_key(&self, unit_id: &str) -> Result<Option<String>, EngineError>;

    /// Forcefully remove a unit, running or not.
    async fn remove_unit(&self, unit_id: &str) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_formats_layer_progress() {
        let event = PullProgress {
            id: Some("a3ed95caeb02".into()),
            status: Some("Downloading".into()),
            progress: Some("[==>   ] 1.2MB/3MB".into()),
            error: None,
        };
        assert_eq!(event.describe(), "a3ed95caeb02: Downloading [==>   ] 1.2MB/3MB");
        assert_eq!(
            PullProgress::status("Pulling from library/busybox").describe(),
            "Pulling from library/busybox"
        );
        assert_eq!(
            PullProgress::failed("manifest unknown").describe(),
            "error: manifest unknown"
        );
    }
}
