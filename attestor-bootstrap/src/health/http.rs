use std::time::Duration;

use async_trait::async_trait;
use error_stack::{bail, Result, ResultExt};
use tracing::debug;

use super::{Error, Prober};
use crate::url::Url;

/// Probes an instance with a single `GET` request against its status route.
pub struct HttpProber {
    client: reqwest::Client,
    path: String,
}

impl HttpProber {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .change_context(Error::Client)?;

        Ok(Self {
            client,
            path: path.into(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &Url) -> Result<(), Error> {
        let url = endpoint
            .join(&self.path)
            .change_context(Error::Endpoint)
            .attach_printable_lazy(|| format!("{{ endpoint = {endpoint}, path = {} }}", self.path))?;

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .change_context(Error::Unreachable)
            .attach_printable_lazy(|| url.to_string())?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "health probe answered");

        if !status.is_success() {
            bail!(Error::Unhealthy(status.as_u16()));
        }

        Ok(())
    }
}
