use std::fmt;
use std::time::Duration;

use docktopus::bollard::errors::Error as BollardError;
use thiserror::Error;

/// Step of a provisioning run, used to tag errors and log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    Connect,
    ImageFetch,
    Create,
    Start,
    Inspect,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStage::Connect => "connect",
            ProvisionStage::ImageFetch => "image fetch",
            ProvisionStage::Create => "create",
            ProvisionStage::Start => "start",
            ProvisionStage::Inspect => "inspect",
        };
        f.write_str(name)
    }
}

/// Failure reported by a container engine call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine answered with an HTTP error status.
    #[error("engine returned {status}: {message}")]
    Status { status: u16, message: String },
    /// The request never produced an engine response.
    #[error("engine transport error: {0}")]
    Transport(String),
    /// The response lacked a field the caller depends on.
    #[error("engine response is missing {0}")]
    MissingField(&'static str),
    /// The pull stream carried an in-band error event.
    #[error("pull reported error: {0}")]
    Pull(String),
    /// Pull policy forbids fetching and the image is not cached.
    #[error("image {0} is not present locally and pulling is disabled")]
    ImageNotPresent(String),
}

impl EngineError {
    /// HTTP status of the engine response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            EngineError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<BollardError> for EngineError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::Status {
                status: status_code,
                message,
            },
            other => EngineError::Transport(other.to_string()),
        }
    }
}

/// Errors returned by sandbox provisioning.
///
/// Every variant means no usable sandbox was handed to the caller.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to connect to container engine: {0}")]
    Connection(#[source] EngineError),

    #[error("failed to fetch image {image}: {source}")]
    ImageFetch {
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("engine rejected unit for image {image}: {source}")]
    Create {
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to start unit {unit_id}: {source}")]
    Start {
        unit_id: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to inspect unit {unit_id}: {source}")]
    Inspect {
        unit_id: String,
        #[source]
        source: EngineError,
    },

    #[error("provisioning cancelled during {stage}")]
    Cancelled { stage: ProvisionStage },

    #[error("provisioning timed out after {timeout:?} during {stage}")]
    TimedOut {
        stage: ProvisionStage,
        timeout: Duration,
    },
}

impl ProvisionError {
    /// The step that was running when provisioning stopped.
    pub fn stage(&self) -> ProvisionStage {
        match self {
            ProvisionError::Connection(_) => ProvisionStage::Connect,
            ProvisionError::ImageFetch { .. } => ProvisionStage::ImageFetch,
            ProvisionError::Create { .. } => ProvisionStage::Create,
            ProvisionError::Start { .. } => ProvisionStage::Start,
            ProvisionError::Inspect { .. } => ProvisionStage::Inspect,
            ProvisionError::Cancelled { stage } | ProvisionError::TimedOut { stage, .. } => *stage,
        }
    }

    /// The underlying engine failure, if the engine was the cause.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            ProvisionError::Connection(source)
            | ProvisionError::ImageFetch { source, .. }
            | ProvisionError::Create { source, .. }
            | ProvisionError::Start { source, .. }
            | ProvisionError::Inspect { source, .. } => Some(source),
            ProvisionError::Cancelled { .. } | ProvisionError::TimedOut { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
