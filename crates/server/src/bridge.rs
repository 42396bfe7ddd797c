use std::sync::Arc;

use async_trait::async_trait;
use server_api::BroadcastBridge;
use shared::{domain::ListId, error::RealtimeError, protocol::BroadcastEnvelope};

use crate::{coordinator::parse_internal, registry::ListRegistry};

/// Delivers through coordinators running in this process, using the same
/// request path as the internal HTTP endpoint.
pub(crate) struct LocalBroadcastBridge {
    registry: Arc<ListRegistry>,
}

impl LocalBroadcastBridge {
    pub(crate) fn new(registry: Arc<ListRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BroadcastBridge for LocalBroadcastBridge {
    async fn deliver(
        &self,
        list_id: &ListId,
        envelope: BroadcastEnvelope,
    ) -> Result<usize, RealtimeError> {
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| RealtimeError::BroadcastDelivery(e.to_string()))?;
        let envelope = parse_internal(list_id, list_id.as_str(), &body)?;
        self.registry.deliver(list_id, envelope).await
    }
}
