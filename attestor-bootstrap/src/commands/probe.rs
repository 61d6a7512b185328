use error_stack::{Result, ResultExt};

use crate::config::Config;
use crate::health::{HealthProber, Prober};
use crate::url::Url;
use crate::Error;

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Externally reachable address of the instance
    #[arg(long)]
    pub endpoint: Url,
}

pub async fn run(config: Config, args: Args) -> Result<Option<String>, Error> {
    HealthProber::new(config.health)
        .change_context(Error::Probe)?
        .probe(&args.endpoint)
        .await
        .change_context(Error::Probe)
        .attach_printable_lazy(|| args.endpoint.to_string())?;

    Ok(Some(format!("{} is healthy", args.endpoint)))
}
