use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use shared::{domain::ListId, error::RealtimeError, protocol::BroadcastEnvelope};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::coordinator::{CoordinatorHandle, DEFAULT_IDLE_TIMEOUT};

/// Maps each list to the one coordinator that owns it in this process.
/// Coordinators stop once idle and are replaced on the next connection.
pub struct ListRegistry {
    coordinators: RwLock<HashMap<ListId, CoordinatorHandle>>,
    accepting: AtomicBool,
    idle_timeout: Duration,
}

impl Default for ListRegistry {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl ListRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            coordinators: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            idle_timeout,
        }
    }

    /// Returns the live coordinator for `list_id`, starting one on first use.
    /// Concurrent first calls for the same list observe the same coordinator.
    pub async fn resolve(&self, list_id: &ListId) -> Result<CoordinatorHandle, RealtimeError> {
        self.ensure_accepting()?;

        {
            let coordinators = self.coordinators.read().await;
            if let Some(handle) = coordinators.get(list_id) {
                if !handle.is_closed() {
                    return Ok(handle.clone());
                }
            }
        }

        let mut coordinators = self.coordinators.write().await;
        self.ensure_accepting()?;
        if let Some(handle) = coordinators.get(list_id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }

        coordinators.retain(|_, handle| !handle.is_closed());
        let handle = CoordinatorHandle::spawn_with_idle_timeout(list_id.clone(), self.idle_timeout);
        coordinators.insert(list_id.clone(), handle.clone());
        Ok(handle)
    }

    /// The running coordinator for `list_id`, if any. Never starts one.
    pub async fn lookup(
        &self,
        list_id: &ListId,
    ) -> Result<Option<CoordinatorHandle>, RealtimeError> {
        self.ensure_accepting()?;
        let coordinators = self.coordinators.read().await;
        Ok(coordinators
            .get(list_id)
            .filter(|handle| !handle.is_closed())
            .cloned())
    }

    /// Hands `envelope` to the list's running coordinator. A list with no
    /// coordinator has no connections, so nothing is delivered.
    pub async fn deliver(
        &self,
        list_id: &ListId,
        envelope: BroadcastEnvelope,
    ) -> Result<usize, RealtimeError> {
        let Some(handle) = self.lookup(list_id).await? else {
            debug!(%list_id, "no coordinator running; event not delivered");
            return Ok(0);
        };
        match handle.broadcast(envelope).await {
            Err(_) if handle.is_closed() && self.accepting.load(Ordering::SeqCst) => Ok(0),
            result => result,
        }
    }

    /// Coordinators that are still running.
    pub async fn len(&self) -> usize {
        self.coordinators
            .read()
            .await
            .values()
            .filter(|handle| !handle.is_closed())
            .count()
    }

    /// Stops every coordinator and refuses further lookups.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let drained: Vec<_> = self.coordinators.write().await.drain().collect();
        info!(coordinators = drained.len(), "shutting down list coordinators");
        for (_, handle) in drained {
            handle.shutdown().await;
        }
    }

    fn ensure_accepting(&self) -> Result<(), RealtimeError> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RealtimeError::PartitionLookup(
                "list coordinators are shutting down".into(),
            ))
        }
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
