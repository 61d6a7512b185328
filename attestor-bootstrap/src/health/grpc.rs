use std::time::Duration;

use async_trait::async_trait;
use error_stack::{bail, report, Result, ResultExt};
use tonic::transport::Endpoint;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::debug;

use super::{Error, Prober};
use crate::url::Url;

/// Probes an instance with a `grpc.health.v1.Health/Check` call.
///
/// The instance only counts as healthy once it answers the call with `SERVING`. The whole round
/// trip, connection included, is bounded by the timeout.
pub struct GrpcProber {
    service: String,
    timeout: Duration,
}

impl GrpcProber {
    /// `service` is the name checked on the instance; the empty name asks for the server as a whole.
    pub fn new(service: impl Into<String>, timeout: Duration) -> Self {
        Self {
            service: service.into(),
            timeout,
        }
    }

    async fn check(&self, endpoint: &Url) -> Result<ServingStatus, Error> {
        let channel = Endpoint::from_shared(endpoint.as_str().to_string())
            .change_context(Error::Endpoint)
            .attach_printable_lazy(|| endpoint.to_string())?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect()
            .await
            .change_context(Error::Unreachable)
            .attach_printable_lazy(|| endpoint.to_string())?;

        let response = HealthClient::new(channel)
            .check(HealthCheckRequest {
                service: self.service.clone(),
            })
            .await
            .change_context(Error::Unreachable)
            .attach_printable_lazy(|| endpoint.to_string())?;

        Ok(response.into_inner().status())
    }
}

#[async_trait]
impl Prober for GrpcProber {
    async fn probe(&self, endpoint: &Url) -> Result<(), Error> {
        let status = tokio::time::timeout(self.timeout, self.check(endpoint))
            .await
            .map_err(|_| report!(Error::Unreachable))
            .attach_printable_lazy(|| format!("no answer within {:?}", self.timeout))??;
        debug!(endpoint = %endpoint, ?status, "grpc health check answered");

        if status != ServingStatus::Serving {
            bail!(Error::NotServing(status.as_str_name().to_string()));
        }

        Ok(())
    }
}
