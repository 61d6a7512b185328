use std::path::PathBuf;

use error_stack::{Result, ResultExt};
use report::LoggableError;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::asyncutil::task;
use crate::bootstrap::{Bootstrapper, SetupRequest};
use crate::config::Config;
use crate::health::{HealthProber, Prober};
use crate::launcher::docker::DockerLauncher;
use crate::launcher::Launcher;
use crate::teardown::TeardownRegistry;
use crate::Error;

#[derive(clap::Args, Debug, Default)]
pub struct Args {
    /// Number of instances to launch, overrides the configured pool size
    #[arg(long)]
    pub pool_size: Option<i64>,
    /// Instance config template file, overrides the configured template
    #[arg(long)]
    pub template: Option<PathBuf>,
}

pub async fn run(mut config: Config, args: Args) -> Result<Option<String>, Error> {
    if args.template.is_some() {
        config.template_path = args.template;
    }

    let request = SetupRequest::from_raw(
        args.pool_size.or(config.pool_size),
        config.template()?,
        config.launch_parameters,
    )
    .change_context(Error::Bootstrap)?;
    let prober = HealthProber::new(config.health).change_context(Error::Probe)?;
    let launcher = DockerLauncher::connect(config.docker).change_context(Error::Bootstrap)?;
    let bootstrapper = Bootstrapper::new(launcher, prober, config.bootstrap);

    let token = CancellationToken::new();
    cancel_on_signal(token.clone())?;

    let mut teardown = TeardownRegistry::default();
    let result = serve(&bootstrapper, request, &mut teardown, token).await;
    tear_down(teardown).await;

    result
}

async fn serve<L, P>(
    bootstrapper: &Bootstrapper<L, P>,
    request: SetupRequest,
    teardown: &mut TeardownRegistry,
    token: CancellationToken,
) -> Result<Option<String>, Error>
where
    L: Launcher + 'static,
    P: Prober,
{
    let pool = bootstrapper
        .bootstrap(request, teardown, token.clone())
        .await
        .change_context(Error::Bootstrap)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&pool.summary()).change_context(Error::Output)?
    );
    info!(
        pool_size = pool.len(),
        "attestor pool is up, waiting for a shutdown signal"
    );

    token.cancelled().await;

    Ok(Some(format!("stopped {} attestor instances", pool.len())))
}

/// Runs the registered cleanups on the blocking pool, whether or not the pool came up.
async fn tear_down(mut teardown: TeardownRegistry) {
    if teardown.is_empty() {
        return;
    }

    info!(instances = teardown.len(), "tearing down attestor pool");
    if let Err(err) = task::spawn_blocking(move || teardown.run()).join().await {
        warn!(err = %LoggableError::from(&err), "attestor pool teardown crashed");
    }
}

fn cancel_on_signal(token: CancellationToken) -> Result<(), Error> {
    let mut sigint = signal(SignalKind::interrupt()).change_context(Error::Signal)?;
    let mut sigterm = signal(SignalKind::terminate()).change_context(Error::Signal)?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {},
            _ = sigterm.recv() => {},
        }

        info!("signal received, shutting down");
        token.cancel();
    });

    Ok(())
}
