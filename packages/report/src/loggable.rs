use std::backtrace::Backtrace;
use std::fmt::{Display, Formatter};
use std::panic::Location;

use error_stack::{AttachmentKind, Frame, FrameKind, Report};
use itertools::Itertools;

/// A flattened view of a [Report], suitable for a single structured log line.
///
/// Each level of the report's context chain becomes one `LoggableError`, with the
/// root cause at the end of the `cause` chain.
#[derive(PartialEq, Debug, Default)]
pub struct LoggableError {
    pub msg: String,
    pub attachments: Vec<String>,
    pub location: String,
    pub cause: Option<Box<LoggableError>>,
    pub backtrace: Option<Vec<String>>,
}

impl Display for LoggableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)?;

        if !self.attachments.is_empty() {
            write!(f, " ({})", self.attachments.iter().join(", "))?;
        }

        match &self.cause {
            Some(cause) => write!(f, ": {}", cause),
            None => Ok(()),
        }
    }
}

impl std::error::Error for LoggableError {}

impl<T> From<&Report<T>> for LoggableError {
    fn from(report: &Report<T>) -> Self {
        // frames are ordered outermost first; within one error the attachments precede their
        // context, so a context frame closes the error currently being collected
        let mut levels = vec![];
        let mut current = LoggableError::default();

        for frame in report.frames() {
            match classify(frame) {
                FrameType::Context(msg) => {
                    current.msg = msg;
                    current.attachments.reverse();
                    levels.push(std::mem::take(&mut current));
                }
                FrameType::Location(location) => current.location = location.to_string(),
                FrameType::Backtrace(backtrace) => {
                    current.backtrace =
                        Some(backtrace.to_string().lines().map(String::from).collect())
                }
                FrameType::Printable(printable) => current.attachments.push(printable),
                FrameType::Opaque => current.attachments.push("opaque attachment".to_string()),
            }
        }

        levels
            .into_iter()
            .rev()
            .reduce(|cause, mut outer| {
                outer.cause = Some(Box::new(cause));
                outer
            })
            .unwrap_or_default()
    }
}

enum FrameType<'a> {
    Context(String),
    Location(&'a Location<'a>),
    Backtrace(&'a Backtrace),
    Printable(String),
    Opaque,
}

fn classify(frame: &Frame) -> FrameType<'_> {
    match frame.kind() {
        FrameKind::Context(context) => FrameType::Context(context.to_string()),
        FrameKind::Attachment(AttachmentKind::Printable(printable)) => {
            FrameType::Printable(printable.to_string())
        }
        FrameKind::Attachment(_) => {
            if let Some(location) = frame.downcast_ref::<Location>() {
                FrameType::Location(location)
            } else if let Some(backtrace) = frame.downcast_ref::<Backtrace>() {
                FrameType::Backtrace(backtrace)
            } else {
                FrameType::Opaque
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use error_stack::Report;
    use thiserror::Error;

    use crate::LoggableError;

    #[derive(Error, Debug)]
    enum Error {
        #[error("{0}")]
        FromString(String),
    }

    #[test]
    fn chain_follows_report_contexts() {
        let report = Report::new(Error::FromString("docker run failed".to_string()))
            .attach_printable("exit status 125")
            .change_context(Error::FromString("failed to launch instance 1".to_string()))
            .attach_printable("image attestor:local")
            .attach_printable("network e2e")
            .change_context(Error::FromString("failed to bootstrap pool".to_string()))
            .attach(5);

        let err = LoggableError::from(&report);

        assert_eq!(err.msg, "failed to bootstrap pool");
        assert_eq!(err.attachments, vec!["opaque attachment".to_string()]);
        assert!(err.location.contains("loggable.rs"));

        let launch = err.cause.as_ref().unwrap();
        assert_eq!(launch.msg, "failed to launch instance 1");
        assert_eq!(
            launch.attachments,
            vec!["image attestor:local".to_string(), "network e2e".to_string()]
        );

        let root = launch.cause.as_ref().unwrap();
        assert_eq!(root.msg, "docker run failed");
        assert_eq!(root.attachments, vec!["exit status 125".to_string()]);
        assert!(root.cause.is_none());
    }

    #[test]
    fn display_contains_every_level() {
        let report = Report::new(Error::FromString("connection refused".to_string()))
            .attach_printable("http://127.0.0.1:49153")
            .change_context(Error::FromString("health probe failed".to_string()))
            .change_context(Error::FromString("instance 0 is unhealthy".to_string()));

        let msg = LoggableError::from(&report).to_string();

        assert!(msg.starts_with("instance 0 is unhealthy"));
        assert!(msg.contains("health probe failed"));
        assert!(msg.contains("connection refused (http://127.0.0.1:49153)"));
    }
}
