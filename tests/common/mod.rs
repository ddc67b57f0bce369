//! Fault-injecting peers for distributed backend tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use namespace_lock::{LockArgs, LockError, LockPeer, LockServer, PeerFuture};

/// A peer that is always offline; it is never called.
#[derive(Debug)]
pub struct OfflinePeer {
    endpoint: String,
}

impl OfflinePeer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl LockPeer for OfflinePeer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn rlock(&self, _args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async { Err(offline()) })
    }

    fn lock(&self, _args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async { Err(offline()) })
    }

    fn runlock(&self, _args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async { Err(offline()) })
    }

    fn unlock(&self, _args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async { Err(offline()) })
    }

    fn refresh(&self, _args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async { Err(offline()) })
    }

    fn force_unlock(&self, _args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async { Err(offline()) })
    }

    fn is_online(&self) -> bool {
        false
    }
}

fn offline() -> LockError {
    LockError::Connection(Box::new(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "peer offline",
    )))
}

/// Delays every call before handing it to a real server.
#[derive(Debug)]
pub struct SlowPeer {
    inner: Arc<LockServer>,
    delay: Duration,
}

impl SlowPeer {
    pub fn new(inner: Arc<LockServer>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl LockPeer for SlowPeer {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    fn rlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.rlock(args).await
        })
    }

    fn lock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.lock(args).await
        })
    }

    fn runlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.runlock(args).await
        })
    }

    fn unlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.unlock(args).await
        })
    }

    fn refresh(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.refresh(args).await
        })
    }

    fn force_unlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.force_unlock(args).await
        })
    }
}

/// Fails every call with a connection error while `failing` is set.
#[derive(Debug)]
pub struct FlakyPeer {
    inner: Arc<LockServer>,
    failing: AtomicBool,
}

impl FlakyPeer {
    pub fn new(inner: Arc<LockServer>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LockError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(LockError::Connection(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected failure",
            ))))
        } else {
            Ok(())
        }
    }
}

impl LockPeer for FlakyPeer {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    fn rlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            self.check()?;
            self.inner.rlock(args).await
        })
    }

    fn lock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            self.check()?;
            self.inner.lock(args).await
        })
    }

    fn runlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            self.check()?;
            self.inner.runlock(args).await
        })
    }

    fn unlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            self.check()?;
            self.inner.unlock(args).await
        })
    }

    fn refresh(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            self.check()?;
            self.inner.refresh(args).await
        })
    }

    fn force_unlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move {
            self.check()?;
            self.inner.force_unlock(args).await
        })
    }
}

/// `n` independent lock servers.
pub fn servers(n: usize) -> Vec<Arc<LockServer>> {
    (0..n)
        .map(|i| Arc::new(LockServer::new(format!("node-{i}"))))
        .collect()
}

pub fn as_peers(servers: &[Arc<LockServer>]) -> Vec<Arc<dyn LockPeer>> {
    servers
        .iter()
        .map(|s| s.clone() as Arc<dyn LockPeer>)
        .collect()
}
