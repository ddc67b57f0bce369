//! Local lock grant.

use tokio::sync::watch;

use namespace_lock_core::key::{LockMode, ResourceKey};
use namespace_lock_core::traits::{LockGrant, LockRequest};

/// Grant for a lock held through the local backend.
#[derive(Debug)]
pub struct LocalGrant {
    key: ResourceKey,
    mode: LockMode,
    operation_id: String,
    /// Local locks cannot be lost; the sender only keeps the channel open.
    #[allow(dead_code)]
    lost_sender: watch::Sender<bool>,
    lost_receiver: watch::Receiver<bool>,
}

impl LocalGrant {
    pub(crate) fn new(request: LockRequest) -> Self {
        let (lost_sender, lost_receiver) = watch::channel(false);
        Self {
            key: request.key,
            mode: request.mode,
            operation_id: request.operation_id,
            lost_sender,
            lost_receiver,
        }
    }
}

impl LockGrant for LocalGrant {
    fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn mode(&self) -> LockMode {
        self.mode
    }

    fn operation_id(&self) -> &str {
        &self.operation_id
    }

    fn lost_token(&self) -> &watch::Receiver<bool> {
        &self.lost_receiver
    }
}
