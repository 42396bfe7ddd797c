use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{ListId, UserId},
    error::RealtimeError,
    protocol::{
        endpoint_url, internal_broadcast_segments, BroadcastEnvelope, DeliveryReceipt, ListEvent,
        INTERNAL_HEADER, LIST_NAMESPACE, NAMESPACE_HEADER, ROOM_HEADER,
    },
};
use tracing::{debug, warn};
use url::Url;

/// Hands a committed item event to the coordinator that owns the list.
#[async_trait]
pub trait BroadcastBridge: Send + Sync {
    /// Returns the number of connections the event was written to.
    async fn deliver(
        &self,
        list_id: &ListId,
        envelope: BroadcastEnvelope,
    ) -> Result<usize, RealtimeError>;
}

/// Reaches a coordinator running in another process over its internal endpoint.
pub struct HttpBroadcastBridge {
    client: Client,
    base_url: Url,
}

impl HttpBroadcastBridge {
    pub fn new(coordinator_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(coordinator_url)
            .with_context(|| format!("invalid coordinator url '{coordinator_url}'"))?;
        if base_url.cannot_be_a_base() {
            bail!("coordinator url '{coordinator_url}' cannot carry a path");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build broadcast http client")?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl BroadcastBridge for HttpBroadcastBridge {
    async fn deliver(
        &self,
        list_id: &ListId,
        envelope: BroadcastEnvelope,
    ) -> Result<usize, RealtimeError> {
        let url = endpoint_url(&self.base_url, internal_broadcast_segments(list_id)).ok_or_else(
            || RealtimeError::BroadcastDelivery(format!("no endpoint under {}", self.base_url)),
        )?;

        let response = self
            .client
            .post(url)
            .header(INTERNAL_HEADER, "true")
            .header(NAMESPACE_HEADER, LIST_NAMESPACE)
            .header(ROOM_HEADER, list_id.as_str())
            .json(&envelope)
            .send()
            .await
            .map_err(|e| RealtimeError::BroadcastDelivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RealtimeError::BroadcastDelivery(format!(
                "coordinator responded with {status}"
            )));
        }

        let receipt: DeliveryReceipt = response
            .json()
            .await
            .map_err(|e| RealtimeError::BroadcastDelivery(e.to_string()))?;
        Ok(receipt.delivered)
    }
}

/// Delivers `event` to everyone on the list except `except`. Failures are
/// logged and dropped; the caller's write has already committed.
pub async fn broadcast_best_effort(
    bridge: &dyn BroadcastBridge,
    list_id: &ListId,
    event: ListEvent,
    except: Vec<UserId>,
) {
    let kind = event.kind().as_str();
    match bridge
        .deliver(list_id, BroadcastEnvelope::new(event, except))
        .await
    {
        Ok(delivered) => debug!(%list_id, kind, delivered, "list event broadcast"),
        Err(err) => warn!(%list_id, kind, error = %err, "list event broadcast failed"),
    }
}
