use error_stack::{Context, Report};

pub trait ErrorExt<Err>
where
    Self: Into<Err>,
    Err: Context,
{
    /// Converts self into a `Report<Err>` instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use thiserror::Error;
    /// use error_stack::Report;
    ///
    /// use report::ErrorExt;
    ///
    /// #[derive(Error, Debug)]
    /// enum DockerError {
    ///     #[error("container exited early")]
    ///     Exited,
    /// }
    ///
    /// #[derive(Error, Debug)]
    /// enum LaunchError {
    ///     #[error("container runtime failed")]
    ///     Docker(#[from] DockerError),
    /// }
    ///
    /// let error: Report<LaunchError> = DockerError::Exited.into_report();
    ///
    /// assert!(matches!(
    ///     error.current_context(),
    ///     LaunchError::Docker(DockerError::Exited)
    /// ));
    /// ```
    fn into_report(self) -> Report<Err> {
        Report::new(self.into())
    }
}

impl<T, Err> ErrorExt<Err> for T
where
    T: Into<Err>,
    Err: Context,
{
}

/// Merges `err` into an accumulated result, so that every error of a batch stays visible.
pub fn extend_err<T, E>(result: Result<T, Report<E>>, err: Report<E>) -> Result<T, Report<E>> {
    match result {
        Ok(_) => Err(err),
        Err(mut acc) => {
            acc.extend_one(err);
            Err(acc)
        }
    }
}
