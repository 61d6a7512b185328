use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use error_stack::Result;
use typed_builder::TypedBuilder;

use super::Error;
use crate::url::Url;

type CleanupFn = Box<dyn FnOnce() -> Result<(), Error> + Send>;

/// Stops an instance and releases its resources.
///
/// Clones share the same underlying operation, which runs at most once: the first call executes
/// it, every later or concurrent call returns `Ok(())` without side effects. This allows both a
/// rollback and the caller's teardown to hold on to the same cleanup.
#[derive(Clone)]
pub struct Cleanup {
    inner: Arc<Mutex<Option<CleanupFn>>>,
}

impl Cleanup {
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(cleanup)))),
        }
    }

    pub fn noop() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn run(&self) -> Result<(), Error> {
        // the lock is held while the operation runs so concurrent callers return only once it is done
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        match guard.take() {
            Some(cleanup) => cleanup(),
            None => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Default for Cleanup {
    fn default() -> Self {
        Self::noop()
    }
}

impl Debug for Cleanup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup")
            .field("done", &self.is_done())
            .finish()
    }
}

/// A running instance of the pool.
#[derive(Debug, Clone, TypedBuilder)]
pub struct InstanceHandle {
    index: usize,
    endpoint: Url,
    internal_endpoint: Url,
    #[builder(setter(into))]
    identity: String,
    #[builder(setter(into))]
    config_path: PathBuf,
    #[builder(default)]
    cleanup: Cleanup,
}

impl InstanceHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Address of the instance as seen from inside its private network.
    pub fn internal_endpoint(&self) -> &Url {
        &self.internal_endpoint
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Stops the instance. Safe to call any number of times.
    pub fn cleanup(&self) -> Result<(), Error> {
        self.cleanup.run()
    }

    pub(crate) fn cleanup_hook(&self) -> Cleanup {
        self.cleanup.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use error_stack::report;

    use super::*;

    #[test]
    fn cleanup_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cleanup = Cleanup::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(!cleanup.is_done());
        assert!(cleanup.run().is_ok());
        assert!(cleanup.run().is_ok());
        assert!(cleanup.clone().run().is_ok());

        assert!(cleanup.is_done());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_cleanup_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cleanup = Cleanup::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let cleanup = cleanup.clone();
                thread::spawn(move || cleanup.run())
            })
            .collect();

        for t in threads {
            assert!(t.join().unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_cleanup_is_not_retried() {
        let cleanup = Cleanup::new(|| Err(report!(Error::Cleanup)));

        assert!(cleanup.run().is_err());
        assert!(cleanup.run().is_ok());
    }

    #[test]
    fn handle_exposes_its_cleanup() {
        let handle = InstanceHandle::builder()
            .index(2)
            .endpoint("http://127.0.0.1:49153".parse().unwrap())
            .internal_endpoint("http://attestor-2:8080".parse().unwrap())
            .identity("0xabc")
            .config_path("/tmp/attestor-2")
            .build();

        assert_eq!(handle.index(), 2);
        assert_eq!(handle.identity(), "0xabc");
        assert!(handle.cleanup().is_ok());
        assert!(handle.cleanup_hook().is_done());
    }
}
