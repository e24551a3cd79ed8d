//! Drain lease: exclusive, time-bounded claim on the counter namespace.

use std::sync::Arc;
use std::time::Duration;

use feedgate_store::CounterStore;

use crate::error::Result;

/// A named lease held in the counter store on behalf of one drainer.
///
/// The holder id is random per instance, so two drainers in one process
/// exclude each other just like drainers on different hosts.
pub struct DrainLease<C: CounterStore + ?Sized> {
    counters: Arc<C>,
    name: String,
    holder: String,
    ttl: Duration,
}

impl<C: CounterStore + ?Sized> DrainLease<C> {
    pub fn new(counters: Arc<C>, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            counters,
            name: name.into(),
            holder: format!("drainer-{}", hex::encode(rand::random::<[u8; 8]>())),
            ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Claim or extend the lease. `false` means another holder owns it.
    pub async fn try_acquire(&self) -> Result<bool> {
        Ok(self
            .counters
            .try_acquire_lease(&self.name, &self.holder, self.ttl)
            .await?)
    }

    /// Give the lease up early. `false` means it had already lapsed.
    pub async fn release(&self) -> Result<bool> {
        Ok(self
            .counters
            .release_lease(&self.name, &self.holder)
            .await?)
    }
}
