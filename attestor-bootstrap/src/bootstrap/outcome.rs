use std::sync::Arc;

use error_stack::{report, Report, ResultExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Error;
use crate::asyncutil::task;
use crate::launcher::{InstanceConfig, InstanceHandle, Launcher};

/// The single message each launch task delivers to the coordinator.
#[derive(Debug)]
pub enum LaunchOutcome {
    Launched(InstanceHandle),
    Failed { index: usize, err: Report<Error> },
}

impl LaunchOutcome {
    pub fn index(&self) -> usize {
        match self {
            LaunchOutcome::Launched(handle) => handle.index(),
            LaunchOutcome::Failed { index, .. } => *index,
        }
    }
}

/// Launches one instance and reports exactly one [LaunchOutcome] for it, whatever happens.
///
/// The launcher call runs in its own blocking task, so a panic is caught and reported as a failure
/// for this index. If `token` is cancelled first, the launch is reported as failed right away and
/// an instance that still comes up afterwards is cleaned up as soon as it does.
pub async fn launch<L>(
    launcher: Arc<L>,
    config: InstanceConfig,
    results: mpsc::Sender<LaunchOutcome>,
    token: CancellationToken,
) where
    L: Launcher + 'static,
{
    let index = config.index;
    let mut job = task::spawn_blocking(move || launcher.launch(config.index, &config));

    let outcome = tokio::select! {
        joined = job.join() => match joined.change_context(Error::Launch { index }) {
            Ok(Ok(handle)) => LaunchOutcome::Launched(handle),
            Ok(Err(err)) => LaunchOutcome::Failed {
                index,
                err: err.change_context(Error::Launch { index }),
            },
            Err(err) => LaunchOutcome::Failed { index, err },
        },
        _ = token.cancelled() => {
            job.detach_with(move |launched| reap(index, launched));

            LaunchOutcome::Failed {
                index,
                err: report!(Error::Abandoned).change_context(Error::Launch { index }),
            }
        }
    };

    debug!(index, launched = matches!(outcome, LaunchOutcome::Launched(_)), "launch finished");

    // capacity matches the number of launches, so this only fails if the coordinator is gone
    if let Err(mpsc::error::SendError(outcome)) = results.send(outcome).await {
        warn!(index, "coordinator stopped listening, cleaning up orphaned instance");
        if let LaunchOutcome::Launched(handle) = outcome {
            if let Err(err) = task::spawn_blocking(move || reap(index, Ok(handle)))
                .join()
                .await
            {
                warn!(
                    index,
                    err = %report::LoggableError::from(&err),
                    "orphaned instance cleanup crashed"
                );
            }
        }
    }
}

fn reap(index: usize, launched: error_stack::Result<InstanceHandle, crate::launcher::Error>) {
    let Ok(handle) = launched else {
        return;
    };

    info!(index, "cleaning up instance from abandoned launch");
    if let Err(err) = handle.cleanup() {
        warn!(
            index,
            err = %report::LoggableError::from(&err),
            "failed to clean up instance from abandoned launch"
        );
    }
}
