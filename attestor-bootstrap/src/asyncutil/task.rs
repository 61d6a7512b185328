use std::any::Any;

use error_stack::{Report, Result};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::warn;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TaskError {
    #[error("task panicked")]
    Panicked,
    #[error("task was cancelled by the runtime")]
    Cancelled,
}

/// A blocking job running on its own thread of the blocking pool.
///
/// A panic inside the job never reaches the waiter: it is caught by the runtime and surfaces as
/// [TaskError::Panicked] from [IsolatedTask::join], with the panic message attached.
pub struct IsolatedTask<T> {
    handle: JoinHandle<T>,
}

pub fn spawn_blocking<F, T>(job: F) -> IsolatedTask<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    IsolatedTask {
        handle: tokio::task::spawn_blocking(job),
    }
}

impl<T> IsolatedTask<T>
where
    T: Send + 'static,
{
    /// Waits for the job to finish. Cancel safe, the job keeps running if this future is dropped.
    pub async fn join(&mut self) -> Result<T, TaskError> {
        (&mut self.handle).await.map_err(into_report)
    }

    /// Stops waiting for the job. Once it finishes, its output is handed to `reap`, which runs
    /// on the blocking pool as well.
    ///
    /// Blocking jobs cannot be aborted, so this is how resources produced by an abandoned job
    /// are still released.
    pub fn detach_with<R>(self, reap: R)
    where
        R: FnOnce(T) + Send + 'static,
    {
        let handle = self.handle;

        tokio::spawn(async move {
            let reaped = match handle.await {
                Ok(output) => spawn_blocking(move || reap(output)).join().await,
                Err(err) => Err(into_report(err)),
            };

            if let Err(err) = reaped {
                warn!(
                    err = %report::LoggableError::from(&err),
                    "detached task did not complete"
                );
            }
        });
    }
}

fn into_report(err: JoinError) -> Report<TaskError> {
    if err.is_panic() {
        Report::new(TaskError::Panicked).attach_printable(panic_message(err.into_panic()))
    } else {
        Report::new(TaskError::Cancelled)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|msg| msg.to_string())
            .unwrap_or_else(|| "panic payload is not a string".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use tokio::runtime::Handle;

    use super::{spawn_blocking, TaskError};

    #[tokio::test]
    async fn join_returns_job_output() {
        let mut task = spawn_blocking(|| 42);

        assert_eq!(task.join().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn panic_becomes_error_with_message() {
        let mut task = spawn_blocking(|| -> u32 { panic!("container runtime exploded") });

        let err = task.join().await.unwrap_err();

        assert_eq!(err.current_context(), &TaskError::Panicked);
        assert!(format!("{err:?}").contains("container runtime exploded"));
    }

    #[tokio::test]
    async fn formatted_panic_message_is_kept() {
        let index = 3;
        let mut task = spawn_blocking(move || -> u32 { panic!("instance {index} crashed") });

        let err = task.join().await.unwrap_err();

        assert!(format!("{err:?}").contains("instance 3 crashed"));
    }

    #[tokio::test]
    async fn detached_task_output_is_reaped() {
        let (tx, rx) = mpsc::channel();
        let task = spawn_blocking(|| {
            std::thread::sleep(Duration::from_millis(20));
            "handle"
        });

        task.detach_with(move |output| tx.send(output).unwrap());

        let reaped = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(reaped, Ok("handle"));
    }

    #[tokio::test]
    async fn reaper_may_block_on_the_runtime() {
        let (tx, rx) = mpsc::channel();
        let task = spawn_blocking(|| "handle");

        // blocking on the runtime panics if this runs on one of its async workers
        task.detach_with(move |output| {
            let output = Handle::current().block_on(async move { output });
            tx.send(output).unwrap();
        });

        let reaped = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(reaped, Ok("handle"));
    }
}
