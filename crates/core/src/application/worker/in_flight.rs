// In-flight delivery tracking, used to drain a queue on shutdown

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    count: AtomicUsize,
    idle: Notify,
}

/// Counts deliveries currently inside the message-handling routine
#[derive(Clone, Default)]
pub struct InFlightTracker {
    inner: Arc<Inner>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one delivery as started; dropping the guard marks it finished
    pub fn enter(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Resolve once no delivery is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent guard drop is not missed
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// `true` if the tracker went idle before `timeout`
    pub async fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_idle()).await.is_ok()
    }
}

/// RAII marker for one in-flight delivery
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
