//! Cancellation fan-out: a single upstream abort source, fanned out to many
//! in-flight futures and sequences. Used to make upstream (subgraph /
//! resolver) work responsive to an externally-triggered abort without each
//! call site having to poll anything.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Why the operation was aborted. Cheaply cloneable so every fanned-out
/// listener gets its own copy.
#[derive(Debug, Clone)]
pub struct AbortReason(pub Arc<str>);

impl AbortReason {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self(message.into())
    }
}

type Listener = Box<dyn FnOnce(AbortReason) + Send>;

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
    fired: Option<AbortReason>,
}

/// A fan-out point: `fire` invokes every currently-registered listener once,
/// and any listener registered afterwards is invoked immediately with the
/// same reason.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

struct ListenerId(u64);

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fired(&self) -> bool {
        self.inner.lock().fired.is_some()
    }

    /// Fire the abort source. Idempotent: only the first call actually
    /// invokes listeners.
    pub fn fire(&self, reason: AbortReason) {
        let listeners = {
            let mut inner = self.inner.lock();
            if inner.fired.is_some() {
                return;
            }
            inner.fired = Some(reason.clone());
            std::mem::take(&mut inner.listeners)
        };
        for (_, listener) in listeners {
            listener(reason.clone());
        }
    }

    fn listen(&self, listener: Listener) -> ListenerId {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.fired.clone() {
            drop(inner);
            listener(reason);
            return ListenerId(u64::MAX);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, listener);
        ListenerId(id)
    }

    fn disconnect(&self, id: &ListenerId) {
        self.inner.lock().listeners.remove(&id.0);
    }

    /// Wrap `future` so it resolves with the original's output, or rejects
    /// with the abort reason if `self` fires first. Removes its internal
    /// listener from the registry under every outcome.
    pub async fn cancellable<F>(&self, future: F) -> Result<F::Output, AbortReason>
    where
        F: Future + Send,
    {
        let (tx, rx) = oneshot::channel::<AbortReason>();
        let tx = Mutex::new(Some(tx));
        let id = self.listen(Box::new(move |reason| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(reason);
            }
        }));

        tokio::select! {
            value = future => {
                self.disconnect(&id);
                Ok(value)
            }
            Ok(reason) = rx => {
                Err(reason)
            }
        }
    }
}

/// The three operations a consumer-facing asynchronous sequence supports:
/// pull the next value, or terminate it early (cleanly, or with an error).
/// `cancellable_sequence` proxies each call of an implementor through
/// `CancellationRegistry::cancellable`.
pub trait IncrementalSequence {
    type Item;

    fn next(&mut self) -> impl Future<Output = Option<Self::Item>> + Send;
    fn return_(&mut self) -> impl Future<Output = ()> + Send;
}

/// Wraps any [`IncrementalSequence`] so every `next()`/`return_()` call races
/// the registry's abort source.
pub struct CancellableSequence<S> {
    inner: S,
    registry: CancellationRegistry,
}

impl<S> CancellableSequence<S>
where
    S: IncrementalSequence + Send,
    S::Item: Send,
{
    pub fn new(inner: S, registry: CancellationRegistry) -> Self {
        Self { inner, registry }
    }

    /// Returns `None` both on natural end-of-sequence and on abort.
    pub async fn next(&mut self) -> Option<S::Item> {
        match self.registry.cancellable(self.inner.next()).await {
            Ok(item) => item,
            Err(_abort_reason) => None,
        }
    }

    pub async fn return_(&mut self) {
        let _ = self.registry.cancellable(self.inner.return_()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fire_resolves_pending_future_instead_of_completion() {
        let registry = CancellationRegistry::new();
        let registry2 = registry.clone();
        let pending = async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            "never"
        };

        let fired = tokio::spawn(async move {
            tokio::task::yield_now().await;
            registry2.fire(AbortReason::new("shutting down"));
        });

        let result = registry.cancellable(pending).await;
        fired.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ready_future_wins_and_disconnects() {
        let registry = CancellationRegistry::new();
        let result = registry.cancellable(async { 1 + 1 }).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(registry.inner.lock().listeners.len(), 0);
    }

    #[tokio::test]
    async fn listening_after_fire_resolves_immediately() {
        let registry = CancellationRegistry::new();
        registry.fire(AbortReason::new("already done"));
        let pending = async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        };
        let result = registry.cancellable(pending).await;
        assert!(result.is_err());
    }
}
