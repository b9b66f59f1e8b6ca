//! Per-run provision progress.
//!
//! Callers that want to render progress hand a `watch::Sender` to
//! [`crate::ProvisionRequest::report_to`] and poll or await the receiver. The
//! provisioner publishes a fresh [`ProvisionStatus`] on every phase change and
//! on every pull event.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionPhase {
    Queued,
    ImagePull,
    ContainerCreate,
    ContainerStart,
    Inspect,
    Ready,
    Failed,
}

impl ProvisionPhase {
    /// Progress percentage (0–100) for UI rendering.
    pub fn progress_pct(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::ImagePull => 20,
            Self::ContainerCreate => 40,
            Self::ContainerStart => 60,
            Self::Inspect => 80,
            Self::Ready => 100,
            Self::Failed => 0,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionStatus {
    pub provision_id: String,
    pub image: String,
    pub unit_id: Option<String>,
    pub phase: ProvisionPhase,
    pub message: Option<String>,
    pub started_at: u64,
    pub updated_at: u64,
    pub progress_pct: u8,
}

impl ProvisionStatus {
    pub fn queued(provision_id: &str, image: &str) -> Self {
        let now = now_ts();
        Self {
            provision_id: provision_id.to_string(),
            image: image.to_string(),
            unit_id: None,
            phase: ProvisionPhase::Queued,
            message: Some("Queued for provisioning".into()),
            started_at: now,
            updated_at: now,
            progress_pct: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Publishes status updates for one run. A reporter without a channel is a
/// no-op, and a channel without receivers is fine too.
pub(crate) struct ProgressReporter {
    status: ProvisionStatus,
    sink: Option<watch::Sender<ProvisionStatus>>,
}

impl ProgressReporter {
    pub(crate) fn new(
        provision_id: &str,
        image: &str,
        sink: Option<watch::Sender<ProvisionStatus>>,
    ) -> Self {
        let reporter = Self {
            status: ProvisionStatus::queued(provision_id, image),
            sink,
        };
        reporter.publish();
        reporter
    }

    pub(crate) fn phase(&mut self, phase: ProvisionPhase, message: impl Into<String>) {
        self.status.phase = phase;
        self.status.progress_pct = phase.progress_pct();
        self.status.message = Some(message.into());
        self.touch();
    }

    pub(crate) fn message(&mut self, message: impl Into<String>) {
        if self.sink.is_none() {
            return;
        }
        self.status.message = Some(message.into());
        self.touch();
    }

    pub(crate) fn unit(&mut self, unit_id: &str) {
        self.status.unit_id = Some(unit_id.to_string());
        self.touch();
    }

    /// The unit was removed again; stop pointing at it.
    pub(crate) fn unit_removed(&mut self) {
        self.status.unit_id = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.status.updated_at = now_ts();
        self.publish();
    }

    fn publish(&self) {
        if let Some(sink) = &self.sink {
            sink.send_replace(self.status.clone());
        }
    }
}

fn now_ts() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
