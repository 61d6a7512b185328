use std::sync::Arc;
use std::time::Duration;

use error_stack::{bail, report, Report, Result, ResultExt};
use futures::future::join_all;
use itertools::{Either, Itertools};
use report::LoggableError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::asyncutil::future::{with_retry, RetryPolicy};
use crate::asyncutil::task;
use crate::health::Prober;
use crate::launcher::{InstanceHandle, Launcher};
use crate::teardown::Teardown;

mod outcome;
mod request;
mod result;

pub use outcome::LaunchOutcome;
pub use request::{PoolSize, SetupRequest};
pub use result::{InstanceInfo, SetupResult};

const PROBE_ATTEMPTS: u64 = 2;

#[derive(Error, Debug)]
pub enum Error {
    #[error("pool size is not set")]
    MissingPoolSize,
    #[error("invalid pool size {0}")]
    InvalidPoolSize(i64),
    #[error("invalid instance config template")]
    InvalidTemplate,
    #[error("failed to launch instance {index}")]
    Launch { index: usize },
    #[error("launch was abandoned before it completed")]
    Abandoned,
    #[error("failed to launch {failed} of {pool_size} instances")]
    PoolLaunch { failed: usize, pool_size: usize },
    #[error("received {received} of {expected} launch outcomes")]
    MissingOutcomes { received: usize, expected: usize },
    #[error("instance {index} failed its health check")]
    Unhealthy { index: usize },
    #[error("bootstrap was cancelled")]
    Cancelled,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    /// Pause between a fully launched pool and its first health check.
    #[serde(with = "humantime_serde")]
    pub settle_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub probe_retry_delay: Duration,
    /// Upper bound on the launch phase. Launches are awaited indefinitely if unset.
    #[serde(with = "humantime_serde")]
    pub launch_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_interval: Duration::from_secs(5),
            probe_retry_delay: Duration::from_secs(2),
            launch_timeout: None,
        }
    }
}

/// Brings up a pool of instances as one all-or-nothing operation.
///
/// Every instance is launched concurrently. If any launch fails, crashes or is abandoned, all
/// instances that did come up are cleaned up again and the failures are returned as a single
/// report. Otherwise the pool is handed to the caller's [Teardown], given time to settle, and each
/// instance has to pass a health probe, with one retry, before the pool is returned.
pub struct Bootstrapper<L, P> {
    launcher: Arc<L>,
    prober: P,
    config: Config,
}

impl<L, P> Bootstrapper<L, P>
where
    L: Launcher + 'static,
    P: Prober,
{
    pub fn new(launcher: L, prober: P, config: Config) -> Self {
        Self {
            launcher: Arc::new(launcher),
            prober,
            config,
        }
    }

    pub async fn bootstrap(
        &self,
        request: SetupRequest,
        teardown: &mut impl Teardown,
        token: CancellationToken,
    ) -> Result<SetupResult, Error> {
        let configs = request.materialize()?;
        let pool_size = configs.len();

        if pool_size == 0 {
            info!("pool size is zero, nothing to launch");
            return Ok(SetupResult::default());
        }

        info!(pool_size, state = "launching", "launching instance pool");

        let (tx, rx) = mpsc::channel(pool_size);
        let launch_token = token.child_token();
        for config in configs {
            tokio::spawn(outcome::launch(
                self.launcher.clone(),
                config,
                tx.clone(),
                launch_token.clone(),
            ));
        }
        drop(tx);

        let launched = self.gather(rx, pool_size, launch_token).await?;

        let result = SetupResult::from_handles(launched);
        for handle in result.instances() {
            teardown.register(handle.index(), handle.cleanup_hook());
        }

        info!(
            pool_size,
            state = "stabilizing",
            settle_interval = ?self.config.settle_interval,
            "all instances launched, waiting for the pool to settle"
        );

        tokio::select! {
            _ = sleep(self.config.settle_interval) => {}
            _ = token.cancelled() => {
                roll_back(result.instances()).await;
                bail!(Error::Cancelled);
            }
        }

        info!(pool_size, state = "verifying", "probing instance health");

        tokio::select! {
            verified = self.verify(&result) => verified?,
            _ = token.cancelled() => {
                roll_back(result.instances()).await;
                bail!(Error::Cancelled);
            }
        }

        info!(pool_size, state = "ready", "instance pool is ready");

        Ok(result)
    }

    /// Waits for one outcome per instance. The pool only counts as launched if every instance
    /// reported in and none of them failed; otherwise everything that did launch is rolled back.
    async fn gather(
        &self,
        mut rx: mpsc::Receiver<LaunchOutcome>,
        pool_size: usize,
        launch_token: CancellationToken,
    ) -> Result<Vec<InstanceHandle>, Error> {
        debug!(pool_size, state = "aggregating", "waiting for launch outcomes");

        let mut deadline = self
            .config
            .launch_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let mut timed_out = false;
        let mut outcomes = Vec::with_capacity(pool_size);

        while outcomes.len() < pool_size {
            let next = match deadline {
                Some(at) => match timeout_at(at, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            pending = pool_size.saturating_sub(outcomes.len()),
                            "launch timeout elapsed, abandoning pending launches"
                        );
                        timed_out = true;
                        deadline = None;
                        launch_token.cancel();
                        continue;
                    }
                },
                None => rx.recv().await,
            };

            match next {
                Some(outcome) => {
                    log_outcome(&outcome);
                    outcomes.push(outcome);
                }
                None => break,
            }
        }

        let received = outcomes.len();
        let (launched, mut failures): (Vec<_>, Vec<_>) =
            outcomes.into_iter().partition_map(|outcome| match outcome {
                LaunchOutcome::Launched(handle) => Either::Left(handle),
                LaunchOutcome::Failed { index, err } => Either::Right((index, err)),
            });

        if received < pool_size {
            roll_back(&launched).await;
            bail!(Error::MissingOutcomes {
                received,
                expected: pool_size,
            });
        }

        if !failures.is_empty() {
            roll_back(&launched).await;

            failures.sort_by_key(|(index, _)| *index);
            let err = combine(failures, pool_size);
            return Err(if timed_out {
                err.attach_printable(format!(
                    "launch timeout of {:?} elapsed",
                    self.config.launch_timeout.unwrap_or_default()
                ))
            } else {
                err
            });
        }

        Ok(launched)
    }

    async fn verify(&self, result: &SetupResult) -> Result<(), Error> {
        let policy = RetryPolicy::repeat_constant(self.config.probe_retry_delay, PROBE_ATTEMPTS);

        for handle in result.instances() {
            let index = handle.index();

            with_retry(|| self.prober.probe(handle.endpoint()), policy)
                .await
                .inspect_err(|err| {
                    error!(
                        index,
                        endpoint = %handle.endpoint(),
                        err = %LoggableError::from(err),
                        "instance failed its health check"
                    )
                })
                .change_context(Error::Unhealthy { index })?;

            debug!(index, endpoint = %handle.endpoint(), "instance is healthy");
        }

        Ok(())
    }
}

fn log_outcome(outcome: &LaunchOutcome) {
    match outcome {
        LaunchOutcome::Launched(handle) => info!(
            index = handle.index(),
            endpoint = %handle.endpoint(),
            identity = handle.identity(),
            "instance launched"
        ),
        LaunchOutcome::Failed { index, err } => error!(
            index,
            err = %LoggableError::from(err),
            "instance failed to launch"
        ),
    }
}

fn combine(failures: Vec<(usize, Report<Error>)>, pool_size: usize) -> Report<Error> {
    let failed = failures.len();

    failures
        .into_iter()
        .map(|(_, err)| err)
        .reduce(|mut combined, err| {
            combined.extend_one(err);
            combined
        })
        .unwrap_or_else(|| report!(Error::Abandoned))
        .change_context(Error::PoolLaunch { failed, pool_size })
}

/// Runs the cleanup of every given instance concurrently. Failures are logged, never returned.
async fn roll_back(handles: &[InstanceHandle]) {
    if handles.is_empty() {
        return;
    }

    warn!(
        count = handles.len(),
        state = "rolling back",
        "rolling back launched instances"
    );

    let cleanups = handles.iter().map(|handle| {
        let index = handle.index();
        let cleanup = handle.cleanup_hook();
        let mut job = task::spawn_blocking(move || cleanup.run());

        async move { (index, job.join().await) }
    });

    for (index, cleaned_up) in join_all(cleanups).await {
        match cleaned_up {
            Ok(Ok(())) => debug!(index, "instance cleaned up"),
            Ok(Err(err)) => warn!(
                index,
                err = %LoggableError::from(&err),
                "failed to clean up instance"
            ),
            Err(err) => warn!(
                index,
                err = %LoggableError::from(&err),
                "instance cleanup crashed"
            ),
        }
    }
}
