use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use server_api::{authenticate_session, ensure_list_access};
use shared::{
    domain::{ListId, SessionId},
    error::{ApiError, ErrorCode, RealtimeError},
    protocol::UserIdentity,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    app_state::AppState,
    coordinator::{ConnectionId, CoordinatorHandle, Outbound},
    registry::ListRegistry,
    routes::http_error,
    session::session_cookie,
};

#[derive(Debug, Deserialize)]
pub(crate) struct SocketQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

impl SocketQuery {
    /// The query token wins; the session cookie is the fallback.
    pub(crate) fn session(self, headers: &HeaderMap) -> Option<SessionId> {
        self.session_id
            .filter(|token| !token.is_empty())
            .map(SessionId::new)
            .or_else(|| session_cookie(headers))
    }
}

pub(crate) async fn list_socket(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<String>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let session = query.session(&headers);
    admit(&state, ListId::new(list_id), session, ws).await
}

/// Authenticates, authorizes and routes a connection attempt before any
/// socket is opened.
pub(crate) async fn admit(
    state: &AppState,
    list_id: ListId,
    session: Option<SessionId>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let (identity, handle) = match prepare(state, &list_id, session.as_ref()).await {
        Ok(admitted) => admitted,
        Err(err) => {
            warn!(%list_id, code = ?err.code, message = %err.message, "list connection refused");
            return http_error(err).into_response();
        }
    };

    let Some(ws) = ws else {
        return (
            StatusCode::UPGRADE_REQUIRED,
            Json(ApiError::new(
                ErrorCode::Validation,
                "list connections require a websocket upgrade",
            )),
        )
            .into_response();
    };

    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| serve_socket(registry, handle, identity, socket))
}

async fn prepare(
    state: &AppState,
    list_id: &ListId,
    session: Option<&SessionId>,
) -> Result<(UserIdentity, CoordinatorHandle), ApiError> {
    let identity = authenticate_session(&state.api, session).await?;
    ensure_list_access(&state.api, list_id, &identity).await?;
    let handle = state.registry.resolve(list_id).await?;
    Ok((identity, handle))
}

/// Registers the connection, starting a fresh coordinator once if the one
/// resolved at admission went idle in the meantime.
async fn join(
    registry: &ListRegistry,
    handle: CoordinatorHandle,
    identity: UserIdentity,
    outbound: Outbound,
) -> Result<(CoordinatorHandle, ConnectionId), RealtimeError> {
    match handle.connect(identity.clone(), outbound.clone()).await {
        Ok(connection_id) => Ok((handle, connection_id)),
        Err(_) if handle.is_closed() => {
            debug!(list_id = %handle.list_id(), "coordinator stopped before join; resolving again");
            let fresh = registry.resolve(handle.list_id()).await?;
            let connection_id = fresh.connect(identity, outbound).await?;
            Ok((fresh, connection_id))
        }
        Err(err) => Err(err),
    }
}

async fn serve_socket(
    registry: Arc<ListRegistry>,
    handle: CoordinatorHandle,
    identity: UserIdentity,
    socket: WebSocket,
) {
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let user_id = identity.id.clone();
    let list_id = handle.list_id().clone();
    let (handle, connection_id) = match join(&registry, handle, identity, outbound).await {
        Ok(joined) => joined,
        Err(err) => {
            warn!(%list_id, %user_id, error = %err, "coordinator rejected connection");
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Inbound frames carry no meaning on list connections.
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut writer) => reader.abort(),
        _ = (&mut reader) => writer.abort(),
    }

    handle.disconnect(connection_id).await;
    debug!(list_id = %handle.list_id(), %user_id, connection_id, "socket tasks finished");
}
