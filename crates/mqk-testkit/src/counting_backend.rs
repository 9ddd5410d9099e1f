//! A `Backend` decorator that counts `begin` calls.
//!
//! Every node in a test cluster ends up holding identical, 2PC-replicated
//! rows, so read load-balancing distribution cannot be told apart by
//! inspecting row contents. Counting how many times each
//! node's backend was actually asked to open a session is the only signal
//! that distinguishes "this node served the read" from "this node already
//! had the answer".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mqk_db::{Backend, Session};
use mqk_schemas::MiddlewareError;

pub struct CountingBackend {
    inner: Arc<dyn Backend>,
    count: AtomicUsize,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            count: AtomicUsize::new(0),
        })
    }

    pub fn begin_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn begin(&self, timeout: Duration) -> Result<Box<dyn Session>, MiddlewareError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.begin(timeout).await
    }

    async fn pool_health(&self) -> bool {
        self.inner.pool_health().await
    }
}
