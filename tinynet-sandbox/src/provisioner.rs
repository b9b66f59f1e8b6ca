//! Sandbox provisioning: image → running, network-isolated unit + netns key.
//!
//! A run is strictly sequential: fetch image (draining the pull stream),
//! create, start, inspect. Each engine call is raced against the caller's
//! cancellation signal and the configured deadline. Once a unit exists, any
//! failure removes it again (unless `cleanup_on_failure` is off) so that an
//! error never leaves a half-provisioned unit behind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::config::{EngineConfig, ProvisionConfig, PullPolicy};
use crate::docker::DockerEngine;
use crate::engine::ContainerEngine;
use crate::error::{EngineError, ProvisionError, ProvisionStage, Result};
use crate::progress::{ProgressReporter, ProvisionPhase, ProvisionStatus};
use crate::unit::{SandboxHandle, UnitSpec, unit_labels};
use crate::CLEANUP_TIMEOUT_SECS;

/// Provision a sandbox using the engine and settings found in the environment.
///
/// Connects to the engine fresh for this call. See [`crate::config`] for the
/// variables read.
pub async fn provision(image: &str) -> Result<SandboxHandle> {
    let provisioner =
        SandboxProvisioner::connect(&EngineConfig::from_env(), ProvisionConfig::from_env()).await?;
    provisioner.provision(image).await
}

/// One provisioning call: the image plus optional cancellation and progress.
pub struct ProvisionRequest<'a> {
    image: &'a str,
    cancel: Option<BoxFuture<'a, ()>>,
    progress: Option<watch::Sender<ProvisionStatus>>,
}

impl<'a> ProvisionRequest<'a> {
    pub fn new(image: &'a str) -> Self {
        Self {
            image,
            cancel: None,
            progress: None,
        }
    }

    /// Abort the run as soon as `signal` completes.
    pub fn cancel_on<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.cancel = Some(Box::pin(signal));
        self
    }

    /// Publish status updates on `sink` while the run progresses.
    pub fn report_to(mut self, sink: watch::Sender<ProvisionStatus>) -> Self {
        self.progress = Some(sink);
        self
    }
}

/// Turns image references into running, network-isolated units.
///
/// Holds no record of what it created: ownership of every returned unit passes
/// to the caller.
#[derive(Clone)]
pub struct SandboxProvisioner {
    engine: Arc<dyn ContainerEngine>,
    config: ProvisionConfig,
}

impl SandboxProvisioner {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: ProvisionConfig) -> Self {
        Self { engine, config }
    }

    /// Connect to a Docker engine and build a provisioner on top of it.
    pub async fn connect(engine_config: &EngineConfig, config: ProvisionConfig) -> Result<Self> {
        let engine = DockerEngine::connect(engine_config)
            .await
            .map_err(ProvisionError::Connection)?;
        Ok(Self::new(Arc::new(engine), config))
    }

    pub async fn provision(&self, image: &str) -> Result<SandboxHandle> {
        self.provision_with(ProvisionRequest::new(image)).await
    }

    pub async fn provision_with(&self, request: ProvisionRequest<'_>) -> Result<SandboxHandle> {
        let provision_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("provision", image = %request.image, %provision_id);
        let run = Run {
            engine: self.engine.as_ref(),
            config: &self.config,
            image: request.image,
            progress: ProgressReporter::new(&provision_id, request.image, request.progress),
            provision_id,
            deadline: self.config.timeout.map(|timeout| Instant::now() + timeout),
            cancel: request
                .cancel
                .unwrap_or_else(|| Box::pin(std::future::pending::<()>())),
        };
        run.execute().instrument(span).await
    }
}

struct Run<'a> {
    engine: &'a dyn ContainerEngine,
    config: &'a ProvisionConfig,
    image: &'a str,
    provision_id: String,
    deadline: Option<Instant>,
    cancel: BoxFuture<'a, ()>,
    progress: ProgressReporter,
}

impl Run<'_> {
    async fn execute(mut self) -> Result<SandboxHandle> {
        info!("provisioning sandbox");

        if let Err(err) = self.fetch_image().await {
            return Err(self.fail(err));
        }
        let unit_id = match self.create().await {
            Ok(unit_id) => unit_id,
            Err(err) => return Err(self.fail(err)),
        };
        match self.start_and_inspect(&unit_id).await {
            Ok(namespace_key) => {
                self.progress.phase(ProvisionPhase::Ready, "Sandbox ready");
                info!(%unit_id, %namespace_key, "sandbox ready");
                Ok(SandboxHandle {
                    unit_id,
                    namespace_key,
                })
            }
            Err(err) => {
                if self.release(&unit_id).await {
                    self.progress.unit_removed();
                }
                Err(self.fail(err))
            }
        }
    }

    async fn fetch_image(&mut self) -> Result<()> {
        let stage = ProvisionStage::ImageFetch;
        let (engine, image) = (self.engine, self.image);

        if self.config.pull_policy != PullPolicy::Always {
            let present = self
                .guarded(stage, engine.image_exists(image))
                .await?
                .map_err(|source| fetch_error(image, source))?;
            if present {
                debug!("image present locally, skipping pull");
                return Ok(());
            }
            if self.config.pull_policy == PullPolicy::Never {
                return Err(fetch_error(
                    image,
                    EngineError::ImageNotPresent(image.to_string()),
                ));
            }
        }

        info!("pulling image");
        self.progress
            .phase(ProvisionPhase::ImagePull, format!("Pulling image {image}"));
        let events = guard(
            &mut self.cancel,
            self.deadline,
            self.config.timeout,
            stage,
            drain_pull(engine, image, &mut self.progress),
        )
        .await?
        .map_err(|source| fetch_error(image, source))?;
        debug!(events, "image pull complete");
        Ok(())
    }

    async fn create(&mut self) -> Result<String> {
        let labels = unit_labels(&self.config.labels, &self.provision_id);
        let spec = UnitSpec::isolated(self.image, &self.config.keep_alive, labels);
        let engine = self.engine;

        self.progress
            .phase(ProvisionPhase::ContainerCreate, "Creating unit");
        let unit_id = self
            .guarded(ProvisionStage::Create, engine.create_unit(&spec))
            .await?
            .and_then(|id| {
                if id.is_empty() {
                    Err(EngineError::MissingField("Id"))
                } else {
                    Ok(id)
                }
            })
            .map_err(|source| ProvisionError::Create {
                image: self.image.to_string(),
                source,
            })?;

        self.progress.unit(&unit_id);
        debug!(%unit_id, command = ?spec.command(), "unit created");
        Ok(unit_id)
    }

    async fn start_and_inspect(&mut self, unit_id: &str) -> Result<String> {
        let engine = self.engine;

        self.progress
            .phase(ProvisionPhase::ContainerStart, "Starting unit");
        self.guarded(ProvisionStage::Start, engine.start_unit(unit_id))
            .await?
            .map_err(|source| ProvisionError::Start {
                unit_id: unit_id.to_string(),
                source,
            })?;

        self.progress
            .phase(ProvisionPhase::Inspect, "Reading network sandbox key");
        self.guarded(ProvisionStage::Inspect, engine.sandbox_key(unit_id))
            .await?
            .and_then(|key| {
                key.filter(|key| !key.is_empty())
                    .ok_or(EngineError::MissingField("NetworkSettings.SandboxKey"))
            })
            .map_err(|source| ProvisionError::Inspect {
                unit_id: unit_id.to_string(),
                source,
            })
    }

    /// Best-effort removal of a unit this run created but could not finish.
    /// Returns whether the unit is gone.
    async fn release(&self, unit_id: &str) -> bool {
        if !self.config.cleanup_on_failure {
            warn!(%unit_id, "cleanup disabled, leaving partially provisioned unit");
            return false;
        }
        let timeout = Duration::from_secs(CLEANUP_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, self.engine.remove_unit(unit_id)).await {
            Ok(Ok(())) => {
                info!(%unit_id, "removed partially provisioned unit");
                true
            }
            Ok(Err(err)) => {
                warn!(%unit_id, error = %err, "failed to remove partially provisioned unit");
                false
            }
            Err(_) => {
                warn!(%unit_id, ?timeout, "timed out removing partially provisioned unit");
                false
            }
        }
    }

    fn fail(&mut self, err: ProvisionError) -> ProvisionError {
        warn!(stage = %err.stage(), error = %err, "provisioning failed");
        self.progress.phase(ProvisionPhase::Failed, err.to_string());
        err
    }

    async fn guarded<T>(
        &mut self,
        stage: ProvisionStage,
        op: impl Future<Output = T>,
    ) -> Result<T> {
        guard(&mut self.cancel, self.deadline, self.config.timeout, stage, op).await
    }
}

/// Run `op` unless the cancel signal or the deadline comes first.
async fn guard<T>(
    cancel: &mut BoxFuture<'_, ()>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    stage: ProvisionStage,
    op: impl Future<Output = T>,
) -> Result<T> {
    let expiry = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        () = cancel => Err(ProvisionError::Cancelled { stage }),
        () = expiry => Err(ProvisionError::TimedOut {
            stage,
            timeout: timeout.unwrap_or_default(),
        }),
        out = op => Ok(out),
    }
}

/// Read the pull stream to its end. The engine only guarantees the image is
/// complete once the stream is exhausted, so nothing else may run before.
async fn drain_pull(
    engine: &dyn ContainerEngine,
    image: &str,
    progress: &mut ProgressReporter,
) -> std::result::Result<usize, EngineError> {
    let mut stream = engine.pull_image(image);
    let mut events = 0usize;
    let mut failure = None;
    while let Some(item) = stream.next().await {
        let event = item?;
        events += 1;
        let line = event.describe();
        trace!(event = %line, "pull progress");
        if let Some(error) = event.error {
            failure.get_or_insert(error);
        }
        progress.message(line);
    }
    match failure {
        Some(error) => Err(EngineError::Pull(error)),
        None => Ok(events),
    }
}

fn fetch_error(image: &str, source: EngineError) -> ProvisionError {
    ProvisionError::ImageFetch {
        image: image.to_string(),
        source,
    }
}
