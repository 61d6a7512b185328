use report::LoggableError;
use tracing::{debug, warn};

use crate::launcher::Cleanup;

/// Receives the cleanup of every instance that makes it into a ready pool.
pub trait Teardown {
    fn register(&mut self, index: usize, cleanup: Cleanup);
}

/// Collects cleanups and runs them, newest first, when [TeardownRegistry::run] is called or the
/// registry is dropped.
#[derive(Debug, Default)]
pub struct TeardownRegistry {
    hooks: Vec<(usize, Cleanup)>,
}

impl TeardownRegistry {
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs all registered cleanups. Failures are logged and do not stop the remaining cleanups.
    pub fn run(&mut self) {
        while let Some((index, cleanup)) = self.hooks.pop() {
            match cleanup.run() {
                Ok(()) => debug!(index, "instance torn down"),
                Err(err) => warn!(
                    index,
                    err = %LoggableError::from(&err),
                    "failed to tear down instance"
                ),
            }
        }
    }
}

impl Teardown for TeardownRegistry {
    fn register(&mut self, index: usize, cleanup: Cleanup) {
        self.hooks.push((index, cleanup));
    }
}

impl Drop for TeardownRegistry {
    fn drop(&mut self) {
        self.run();
    }
}
