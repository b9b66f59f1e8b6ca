use std::collections::HashMap;
use std::sync::Arc;

use docktopus::DockerBuilder;
use docktopus::bollard::Docker;
use docktopus::bollard::container::{
    Config as BollardConfig, CreateContainerOptions, InspectContainerOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use docktopus::bollard::image::CreateImageOptions;
use docktopus::bollard::models::{CreateImageInfo, HostConfig};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::{ContainerEngine, PullProgress};
use crate::error::EngineError;
use crate::unit::UnitSpec;

/// [`ContainerEngine`] backed by the Docker Engine API.
pub struct DockerEngine {
    client: Arc<Docker>,
}

impl DockerEngine {
    /// Connect to the engine named by `config` and check that it answers.
    pub async fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let builder = match config.docker_host.as_deref() {
            Some(host) => DockerBuilder::with_address(host).await.map_err(|err| {
                EngineError::Transport(format!("Failed to connect to docker at {host}: {err}"))
            })?,
            None => DockerBuilder::new().await.map_err(|err| {
                EngineError::Transport(format!("Failed to connect to docker: {err}"))
            })?,
        };
        let engine = Self {
            client: builder.client(),
        };
        let version = engine.client.ping().await?;
        debug!(host = ?config.docker_host, %version, "connected to docker engine");
        Ok(engine)
    }
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        match self.client.inspect_image(&normalize_image_ref(image)).await {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = EngineError::from(err);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<PullProgress, EngineError>> {
        let options = CreateImageOptions {
            from_image: normalize_image_ref(image),
            ..Default::default()
        };
        self.client
            .create_image(Some(options), None, None)
            .map(|item| item.map(pull_progress).map_err(EngineError::from))
            .boxed()
    }

    async fn create_unit(&self, spec: &UnitSpec) -> Result<String, EngineError> {
        let response = self
            .client
            .create_container(None::<CreateContainerOptions<String>>, build_unit_config(spec))
            .await?;
        for warning in &response.warnings {
            debug!(container_id = %response.id, %warning, "engine warning on create");
        }
        if response.id.is_empty() {
            return Err(EngineError::MissingField("Id"));
        }
        Ok(response.id)
    }

    async fn start_unit(&self, unit_id: &str) -> Result<(), EngineError> {
        self.client
            .start_container(unit_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn sandbox_key(&self, unit_id: &str) -> Result<Option<String>, EngineError> {
        let inspect = self
            .client
            .inspect_container(unit_id, None::<InspectContainerOptions>)
            .await?;
        Ok(inspect
            .network_settings
            .and_then(|settings| settings.sandbox_key))
    }

    async fn remove_unit(&self, unit_id: &str) -> Result<(), EngineError> {
        self.client
            .remove_container(
                unit_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

/// Build the container config for a unit: command, `none` network, labels.
fn build_unit_config(spec: &UnitSpec) -> BollardConfig<String> {
    let host_config = HostConfig {
        network_mode: Some(spec.network_mode().to_string()),
        ..Default::default()
    };
    let labels: HashMap<String, String> = spec.labels().clone();

    BollardConfig {
        image: Some(spec.image().to_string()),
        cmd: spec.command().map(<[String]>::to_vec),
        labels: (!labels.is_empty()).then_some(labels),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn pull_progress(info: CreateImageInfo) -> PullProgress {
    PullProgress {
        id: info.id,
        status: info.status,
        progress: info.progress,
        error: info.error,
    }
}

/// Apply the Docker CLI's `:latest` default to an untagged reference.
///
/// Without a tag the engine's create-image endpoint pulls every tag of the
/// repository.
fn normalize_image_ref(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let name = image.rsplit('/').next().unwrap_or(image);
    if name.contains(':') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}
