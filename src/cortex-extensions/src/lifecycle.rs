//! Cleanup callbacks, lifecycle handles and subscriptions.

use futures::future::BoxFuture;
use std::sync::Mutex;

use crate::Result;

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A teardown callback returned from `activate`.
pub struct Cleanup {
    label: String,
    run: CleanupFn,
}

impl Cleanup {
    /// Wrap an async cleanup.
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(move || Box::pin(f())),
        }
    }

    /// Wrap a synchronous cleanup.
    pub fn sync<F>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self::new(label, move || async move { f() })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn run(self) -> Result<()> {
        (self.run)().await
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup").field("label", &self.label).finish()
    }
}

/// Handle to an activated extension, from either execution backend.
///
/// `deactivate` must be idempotent: once a call completes, later calls
/// return `Ok(())` without side effects.
#[async_trait::async_trait]
pub trait LifecycleHandle: Send + Sync {
    async fn deactivate(&self) -> Result<()>;
}

/// Run cleanups last-acquired first, collecting every failure.
pub(crate) async fn run_cleanups_reversed(cleanups: Vec<Cleanup>, failures: &mut Vec<String>) {
    for cleanup in cleanups.into_iter().rev() {
        let label = cleanup.label().to_string();
        if let Err(e) = cleanup.run().await {
            failures.push(format!("cleanup '{}': {}", label, e));
        }
    }
}

type UnsubscribeFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Event subscription whose `unsubscribe` runs at most once.
pub struct Subscription {
    unsubscribe: Mutex<Option<UnsubscribeFn>>,
}

impl Subscription {
    pub fn new(f: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            unsubscribe: Mutex::new(Some(Box::new(f))),
        }
    }

    /// A subscription with nothing to release.
    pub fn noop() -> Self {
        Self {
            unsubscribe: Mutex::new(None),
        }
    }

    /// Release the subscription. Later calls are no-ops.
    pub fn unsubscribe(&self) -> Result<()> {
        let f = match self.unsubscribe.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match f {
            Some(f) => f(),
            None => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        match self.unsubscribe.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_cleanups_run_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let cleanups = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                let order = order.clone();
                Cleanup::sync(name, move || {
                    order.lock().unwrap().push(name);
                    Ok(())
                })
            })
            .collect();

        let mut failures = Vec::new();
        run_cleanups_reversed(cleanups, &mut failures).await;

        assert!(failures.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_cleanup_failures_do_not_short_circuit() {
        let ran = Arc::new(AtomicU32::new(0));
        let ran_a = ran.clone();
        let cleanups = vec![
            Cleanup::sync("a", move || {
                ran_a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Cleanup::sync("b", || Err(crate::ExtensionError::validation("boom"))),
        ];

        let mut failures = Vec::new();
        run_cleanups_reversed(cleanups, &mut failures).await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(failures, vec!["cleanup 'b': boom".to_string()]);
    }

    #[test]
    fn test_subscription_is_idempotent() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(sub.is_active());
        sub.unsubscribe().unwrap();
        sub.unsubscribe().unwrap();
        assert!(!sub.is_active());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
