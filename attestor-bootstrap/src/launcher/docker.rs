use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, ContainerInspectResponse, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, RemoveContainerOptionsBuilder,
    StartContainerOptions,
};
use bollard::Docker;
use error_stack::{report, Report, Result, ResultExt};
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use super::keystore::Keystore;
use super::{Cleanup, Error, InstanceConfig, InstanceHandle, Launcher};
use crate::url::Url;

const CONFIG_FILE: &str = "config.toml";
const CONFIG_MOUNT: &str = "/config";
const HOST_GATEWAY: &str = "host.docker.internal:host-gateway";
const LOOPBACK: &str = "127.0.0.1";

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    pub image: String,
    pub container_prefix: String,
    pub network: Option<String>,
    pub container_port: u16,
    pub work_dir: PathBuf,
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: "attestor:local".to_string(),
            container_prefix: "attestor".to_string(),
            network: None,
            container_port: 8080,
            work_dir: std::env::temp_dir().join("attestor-bootstrap"),
            args: vec![
                "--config".to_string(),
                format!("{CONFIG_MOUNT}/{CONFIG_FILE}"),
            ],
        }
    }
}

/// The part of the docker engine api needed to run an instance.
#[automock]
#[async_trait]
pub trait ContainerApi: Send + Sync + 'static {
    /// Creates a container and returns its id.
    async fn create(&self, name: &str, body: ContainerCreateBody) -> Result<String, DockerError>;
    async fn start(&self, id: &str) -> Result<(), DockerError>;
    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, DockerError>;
    /// Force-removes a container, stopping it first if needed.
    async fn remove(&self, id: &str) -> Result<(), DockerError>;
}

#[async_trait]
impl ContainerApi for Docker {
    async fn create(&self, name: &str, body: ContainerCreateBody) -> Result<String, DockerError> {
        let options = CreateContainerOptionsBuilder::default().name(name).build();

        Ok(self.create_container(Some(options), body).await?.id)
    }

    async fn start(&self, id: &str) -> Result<(), DockerError> {
        self.start_container(id, None::<StartContainerOptions>)
            .await?;

        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, DockerError> {
        Ok(self
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?)
    }

    async fn remove(&self, id: &str) -> Result<(), DockerError> {
        self.remove_container(
            id,
            Some(RemoveContainerOptionsBuilder::default().force(true).build()),
        )
        .await?;

        Ok(())
    }
}

/// Runs every instance as a docker container, driven through the docker engine api.
///
/// Each container gets its own fresh directory below `work_dir`, mounted at `/config`, which
/// holds the rendered config and the instance keystore. Cleanups only ever touch the container id
/// returned by the create call of the same launch.
pub struct DockerLauncher<C = Docker> {
    api: Arc<C>,
    config: Config,
}

impl DockerLauncher<Docker> {
    /// Connects to the local docker daemon, honouring `DOCKER_HOST`.
    pub fn connect(config: Config) -> Result<Self, Error> {
        let docker = Docker::connect_with_local_defaults().change_context(Error::Connect)?;

        Ok(Self::new(docker, config))
    }
}

impl<C> DockerLauncher<C>
where
    C: ContainerApi,
{
    pub fn new(api: C, config: Config) -> Self {
        Self {
            api: Arc::new(api),
            config,
        }
    }

    fn container_name(&self, index: usize) -> String {
        format!("{}-{}", self.config.container_prefix, index)
    }

    fn exposed_port(&self) -> String {
        format!("{}/tcp", self.config.container_port)
    }

    fn container_body(&self, dir: &Path, host_access: bool) -> ContainerCreateBody {
        let port = self.exposed_port();

        ContainerCreateBody {
            image: Some(self.config.image.clone()),
            cmd: Some(self.config.args.clone()),
            exposed_ports: Some(HashMap::from([(port.clone(), HashMap::new())])),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{CONFIG_MOUNT}", dir.display())]),
                // an empty host port lets docker pick a free one
                port_bindings: Some(HashMap::from([(
                    port,
                    Some(vec![PortBinding {
                        host_ip: Some(LOOPBACK.to_string()),
                        host_port: None,
                    }]),
                )])),
                network_mode: self.config.network.clone(),
                extra_hosts: host_access.then(|| vec![HOST_GATEWAY.to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Creates a directory no other launch shares and fills it with config and keystore.
    fn prepare(&self, name: &str, config: &InstanceConfig) -> Result<(PathBuf, String), Error> {
        let dir = fs::create_dir_all(&self.config.work_dir)
            .and_then(|_| {
                tempfile::Builder::new()
                    .prefix(&format!("{name}-"))
                    .tempdir_in(&self.config.work_dir)
            })
            .change_context(Error::Prepare)
            .attach_printable_lazy(|| self.config.work_dir.display().to_string())?
            .keep();

        let identity = fs::write(dir.join(CONFIG_FILE), &config.contents)
            .change_context(Error::Prepare)
            .attach_printable_lazy(|| dir.display().to_string())
            .and_then(|_| Keystore::generate().write_to(&dir));

        match identity {
            Ok(identity) => Ok((dir, identity)),
            Err(err) => match remove_dir(&dir) {
                Ok(()) => Err(err),
                Err(cleanup_err) => report::extend_err(Err(err), cleanup_err),
            },
        }
    }

    fn start(&self, runtime: &Handle, id: &str, name: &str) -> Result<(Url, Url), Error> {
        block_on(runtime, self.api.start(id))
            .change_context(Error::Start)
            .attach_printable_lazy(|| format!("{{ container = {name}, id = {id} }}"))?;

        let port = self.exposed_port();
        let inspected = block_on(runtime, self.api.inspect(id)).change_context(Error::Endpoint)?;
        let host_port = published_port(&inspected, &port)
            .ok_or_else(|| report!(Error::Endpoint))
            .attach_printable_lazy(|| format!("{{ container = {name}, port = {port} }}"))?;

        let endpoint = Url::new_non_sensitive(&format!("http://{LOOPBACK}:{host_port}"))
            .change_context(Error::Endpoint)?;
        let internal_endpoint =
            Url::new_non_sensitive(&format!("http://{name}:{}", self.config.container_port))
                .change_context(Error::Endpoint)?;

        Ok((endpoint, internal_endpoint))
    }

    fn cleanup(&self, runtime: Handle, id: String, dir: PathBuf) -> Cleanup {
        let api = self.api.clone();

        Cleanup::new(move || {
            let container = remove_container(&runtime, api.as_ref(), &id);

            match remove_dir(&dir) {
                Ok(()) => container,
                Err(err) => report::extend_err(container, err),
            }
        })
    }
}

impl<C> Launcher for DockerLauncher<C>
where
    C: ContainerApi,
{
    fn launch(&self, index: usize, config: &InstanceConfig) -> Result<InstanceHandle, Error> {
        let runtime = Handle::try_current().change_context(Error::Start)?;
        let name = self.container_name(index);

        info!(index, container = name, "launching instance");

        let (dir, identity) = self.prepare(&name, config)?;
        let body = self.container_body(&dir, config.parameters.host_access);

        let id = match block_on(&runtime, self.api.create(&name, body)) {
            Ok(id) => id,
            Err(err) => {
                // nothing was created, and a container holding the name is not ours to remove
                if let Err(cleanup_err) = remove_dir(&dir) {
                    log_cleanup_failure(index, &cleanup_err);
                }

                return Err(err.change_context(Error::Start).attach_printable(format!(
                    "{{ image = {}, container = {name} }}",
                    self.config.image
                )));
            }
        };
        debug!(index, container = name, id, "container created");

        let cleanup = self.cleanup(runtime.clone(), id.clone(), dir.clone());

        match self.start(&runtime, &id, &name) {
            Ok((endpoint, internal_endpoint)) => Ok(InstanceHandle::builder()
                .index(index)
                .endpoint(endpoint)
                .internal_endpoint(internal_endpoint)
                .identity(identity)
                .config_path(dir)
                .cleanup(cleanup)
                .build()),
            Err(err) => {
                if let Err(cleanup_err) = cleanup.run() {
                    log_cleanup_failure(index, &cleanup_err);
                }

                Err(err)
            }
        }
    }
}

/// Drives a docker call to completion from the synchronous launch and cleanup paths.
fn block_on<F: Future>(runtime: &Handle, future: F) -> F::Output {
    match Handle::try_current().map(|current| current.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(|| runtime.block_on(future))
        }
        _ => runtime.block_on(future),
    }
}

fn remove_container<C>(runtime: &Handle, api: &C, id: &str) -> Result<(), Error>
where
    C: ContainerApi + ?Sized,
{
    match block_on(runtime, api.remove(id)) {
        Ok(()) => Ok(()),
        Err(err) if is_not_found(&err) => {
            debug!(id, "container already gone");
            Ok(())
        }
        Err(err) => Err(err
            .change_context(Error::Cleanup)
            .attach_printable(format!("{{ id = {id} }}"))),
    }
}

fn is_not_found(err: &Report<DockerError>) -> bool {
    matches!(
        err.current_context(),
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn remove_dir(dir: &Path) -> Result<(), Error> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Report::new(err)
            .change_context(Error::Cleanup)
            .attach_printable(dir.display().to_string())),
    }
}

fn log_cleanup_failure(index: usize, err: &Report<Error>) {
    warn!(
        index,
        err = %report::LoggableError::from(err),
        "failed to remove partially started instance"
    );
}

/// The first host port docker published for `port`, e.g. `8080/tcp`.
fn published_port(inspected: &ContainerInspectResponse, port: &str) -> Option<u16> {
    inspected
        .network_settings
        .as_ref()?
        .ports
        .as_ref()?
        .get(port)?
        .as_ref()?
        .iter()
        .filter_map(|binding| binding.host_port.as_deref())
        .find_map(|host_port| host_port.parse().ok())
}
