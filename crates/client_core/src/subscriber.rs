use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use shared::{
    domain::{ListId, SessionId},
    protocol::{endpoint_url, list_socket_segments, ListEvent},
};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{dispatcher::EventDispatcher, error::ClientError};

/// One websocket per mounted list view. Frames are decoded and dispatched in
/// arrival order; a closed connection is not reopened.
pub struct ListEventSubscriber {
    list_id: ListId,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ListEventSubscriber {
    pub async fn connect(
        server_url: &str,
        list_id: &ListId,
        session_id: &SessionId,
        dispatcher: Arc<EventDispatcher>,
    ) -> Result<Self, ClientError> {
        let ws_url = socket_url(server_url, list_id, session_id)?;
        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        info!(%list_id, "list socket connected");

        let (mut writer, mut reader) = stream.split();
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let task_list_id = list_id.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        let _ = writer.send(Message::Close(None)).await;
                        break;
                    }
                    frame = reader.next() => match frame {
                        Some(Ok(Message::Text(text))) => match ListEvent::from_wire(&text) {
                            Ok(event) => {
                                let handled = dispatcher.dispatch(&event);
                                debug!(list_id = %task_list_id, kind = event.kind().as_str(), handled, "list event dispatched");
                            }
                            Err(err) => {
                                warn!(list_id = %task_list_id, error = %err, "dropping malformed list event");
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(list_id = %task_list_id, error = %err, "list socket receive failed");
                            break;
                        }
                    },
                }
            }
            info!(list_id = %task_list_id, "list socket closed");
        });

        Ok(Self {
            list_id: list_id.clone(),
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    /// True once the server closed the socket or the connection failed.
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Sends a close frame and waits for the reader to stop. No handler runs
    /// after this returns.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ListEventSubscriber {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// `http(s)://host/prefix` becomes
/// `ws(s)://host/prefix/ws/list/{listId}?sessionId=...`.
pub fn socket_url(
    server_url: &str,
    list_id: &ListId,
    session_id: &SessionId,
) -> Result<Url, ClientError> {
    let mut url =
        Url::parse(server_url).map_err(|_| ClientError::InvalidUrl(server_url.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(ClientError::InvalidUrl(server_url.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::InvalidUrl(server_url.to_string()))?;
    let mut url = endpoint_url(&url, list_socket_segments(list_id))
        .ok_or_else(|| ClientError::InvalidUrl(server_url.to_string()))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("sessionId", session_id.as_str());
    Ok(url)
}

#[cfg(test)]
#[path = "tests/subscriber_tests.rs"]
mod tests;
