use error_stack::Result;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::url::Url;

pub mod docker;
mod handle;
pub mod keystore;
mod template;

pub use handle::{Cleanup, InstanceHandle};
pub use template::{ConfigTemplate, InstanceConfig};

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to connect to the container runtime")]
    Connect,
    #[error("failed to prepare instance directory")]
    Prepare,
    #[error("failed to generate instance key material")]
    Keystore,
    #[error("failed to start instance")]
    Start,
    #[error("failed to resolve instance endpoint")]
    Endpoint,
    #[error("failed to clean up instance")]
    Cleanup,
    #[error("invalid instance config template")]
    Template,
}

/// Starts one external service instance.
///
/// Implementations are invoked concurrently from independent blocking tasks, each with its own
/// [InstanceConfig]. A launch that returns an error must not leave anything running.
#[automock]
pub trait Launcher: Send + Sync {
    fn launch(&self, index: usize, config: &InstanceConfig) -> Result<InstanceHandle, Error>;
}

/// Settings shared read-only by every instance of a pool.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LaunchParameters {
    #[serde(deserialize_with = "Url::deserialize_sensitive")]
    pub adapter_url: Url,
    pub router_address: String,
    pub network: String,
    #[serde(default)]
    pub host_access: bool,
}

impl Default for LaunchParameters {
    fn default() -> Self {
        Self {
            adapter_url: Url::new_sensitive("http://localhost:8545/")
                .expect("default adapter url must be valid"),
            router_address: String::new(),
            network: "localnet".to_string(),
            host_access: false,
        }
    }
}
