use std::time::Duration;

use async_trait::async_trait;
use error_stack::Result;
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::url::Url;

mod grpc;
mod http;

pub use grpc::GrpcProber;
pub use http::HttpProber;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to build health probe client")]
    Client,
    #[error("invalid probe endpoint")]
    Endpoint,
    #[error("instance did not answer the health probe")]
    Unreachable,
    #[error("instance reported unhealthy status {0}")]
    Unhealthy(u16),
    #[error("instance reported serving status {0}")]
    NotServing(String),
}

/// A single liveness round trip against an instance.
///
/// Probers never retry on their own; how often and how long to wait between attempts is up to the caller.
#[automock]
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &Url) -> Result<(), Error>;
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(tag = "type")]
pub enum Config {
    Http {
        #[serde(default = "default_status_path")]
        path: String,
        #[serde(with = "humantime_serde", default = "default_timeout")]
        timeout: Duration,
    },
    Grpc {
        /// Name passed to the `grpc.health.v1` check, empty for the overall server status.
        #[serde(default)]
        service: String,
        #[serde(with = "humantime_serde", default = "default_timeout")]
        timeout: Duration,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self::Grpc {
            service: String::new(),
            timeout: default_timeout(),
        }
    }
}

fn default_status_path() -> String {
    "/status".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// The prober selected by [Config].
pub enum HealthProber {
    Http(HttpProber),
    Grpc(GrpcProber),
}

impl HealthProber {
    pub fn new(config: Config) -> Result<Self, Error> {
        match config {
            Config::Http { path, timeout } => HttpProber::new(path, timeout).map(Self::Http),
            Config::Grpc { service, timeout } => Ok(Self::Grpc(GrpcProber::new(service, timeout))),
        }
    }
}

#[async_trait]
impl Prober for HealthProber {
    async fn probe(&self, endpoint: &Url) -> Result<(), Error> {
        match self {
            HealthProber::Http(prober) => prober.probe(endpoint).await,
            HealthProber::Grpc(prober) => prober.probe(endpoint).await,
        }
    }
}
