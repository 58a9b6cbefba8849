//! The `Lazy<T>` box: either an already-computed value, or a one-shot thunk
//! that produces one. Mirrors the executor's `BoxedPromiseOrValue` contract —
//! evaluating it is idempotent because we only ever evaluate it once, by
//! consuming `self`.

use futures::future::BoxFuture;

/// A ready value, or a pending future of one.
pub enum Lazy<T> {
    Ready(T),
    Pending(BoxFuture<'static, T>),
}

impl<T> Lazy<T> {
    pub fn ready(value: T) -> Self {
        Lazy::Ready(value)
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        Lazy::Pending(Box::pin(future))
    }

    /// Take the ready value out, or hand back `self` unchanged if it's still
    /// pending. Never polls the inner future.
    pub fn try_into_ready(self) -> Result<T, Self> {
        match self {
            Lazy::Ready(value) => Ok(value),
            pending => Err(pending),
        }
    }

    /// Consume this value into a boxed future, wrapping an already-ready
    /// value in `futures::future::ready` so callers can always `.await` it.
    pub fn into_future(self) -> BoxFuture<'static, T>
    where
        T: Send + 'static,
    {
        match self {
            Lazy::Ready(value) => Box::pin(std::future::ready(value)),
            Lazy::Pending(future) => future,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Lazy::Ready(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_short_circuits() {
        let lazy = Lazy::ready(42);
        assert!(lazy.is_ready());
        assert_eq!(lazy.try_into_ready().ok(), Some(42));
    }

    #[tokio::test]
    async fn pending_resolves_via_future() {
        let lazy = Lazy::pending(async { 7 });
        assert!(!lazy.is_ready());
        let lazy = match lazy.try_into_ready() {
            Ok(_) => panic!("should still be pending"),
            Err(lazy) => lazy,
        };
        assert_eq!(lazy.into_future().await, 7);
    }
}
