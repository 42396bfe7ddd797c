use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use server_api::{
    authenticate_session, create_item, create_list, edit_list, get_details, get_lists,
    list_items, mark_unwatched, mark_watched, remove_item, update_item,
};
use shared::{
    domain::{ItemId, ListId},
    error::{ApiError, ErrorCode, RealtimeError},
    protocol::{
        DeliveryReceipt, ItemSnapshot, ItemUpdate, ItemsFilter, ListDetails, ListRename,
        ListSummary, NewItem, NewList, UserIdentity, INTERNAL_HEADER, LIST_NAMESPACE,
        NAMESPACE_HEADER, ROOM_HEADER,
    },
};
use tracing::{error, info, warn};

use crate::{app_state::AppState, coordinator::parse_internal, session::request_session};

pub(crate) type HttpError = (StatusCode, Json<ApiError>);

pub(crate) fn http_error(err: ApiError) -> HttpError {
    (status_for(err.code), Json(err))
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        error!(error = %e, "health check failed");
        http_error(ApiError::new(ErrorCode::Unavailable, e.to_string()))
    })?;
    Ok("ok")
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserIdentity, HttpError> {
    authenticate_session(&state.api, request_session(headers).as_ref())
        .await
        .map_err(http_error)
}

pub(crate) async fn http_list_items(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<String>,
    Query(filter): Query<ItemsFilter>,
    headers: HeaderMap,
) -> Result<Json<Vec<ItemSnapshot>>, HttpError> {
    let user = authenticate(&state, &headers).await?;
    let items = list_items(&state.api, &user, &ListId::new(list_id), filter)
        .await
        .map_err(http_error)?;
    Ok(Json(items))
}

pub(crate) async fn http_create_item(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<String>,
    headers: HeaderMap,
    Json(item): Json<NewItem>,
) -> Result<(StatusCode, Json<ItemSnapshot>), HttpError> {
    let user = authenticate(&state, &headers).await?;
    let created = create_item(&state.api, &user, &ListId::new(list_id), item)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn http_update_item(
    State(state): State<Arc<AppState>>,
    Path((list_id, item_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(update): Json<ItemUpdate>,
) -> Result<Json<ItemSnapshot>, HttpError> {
    let user = authenticate(&state, &headers).await?;
    let updated = update_item(
        &state.api,
        &user,
        &ListId::new(list_id),
        &ItemId::new(item_id),
        update,
    )
    .await
    .map_err(http_error)?;
    Ok(Json(updated))
}

pub(crate) async fn http_remove_item(
    State(state): State<Arc<AppState>>,
    Path((list_id, item_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, HttpError> {
    let user = authenticate(&state, &headers).await?;
    remove_item(&state.api, &user, &ListId::new(list_id), &ItemId::new(item_id))
        .await
        .map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn http_mark_watched(
    State(state): State<Arc<AppState>>,
    Path((list_id, item_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<ItemSnapshot>, HttpError> {
    let user = authenticate(&state, &headers).await?;
    let item = mark_watched(&state.api, &user, &ListId::new(list_id), &ItemId::new(item_id))
        .await
        .map_err(http_error)?;
    Ok(Json(item))
}

pub(crate) async fn http_mark_unwatched(
    State(state): State<Arc<AppState>>,
    Path((list_id, item_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<ItemSnapshot>, HttpError> {
    let user = authenticate(&state, &headers).await?;
    let item = mark_unwatched(&state.api, &user, &ListId::new(list_id), &ItemId::new(item_id))
        .await
        .map_err(http_error)?;
    Ok(Json(item))
}

pub(crate) async fn http_get_lists(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ListSummary>>, HttpError> {
    let user = authenticate(&state, &headers).await?;
    let lists = get_lists(&state.api, &user).await.map_err(http_error)?;
    Ok(Json(lists))
}

pub(crate) async fn http_create_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(list): Json<NewList>,
) -> Result<(StatusCode, Json<ListSummary>), HttpError> {
    let user = authenticate(&state, &headers).await?;
    let created = create_list(&state.api, &user, list)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn http_get_details(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ListDetails>, HttpError> {
    let user = authenticate(&state, &headers).await?;
    let details = get_details(&state.api, &user, &ListId::new(list_id))
        .await
        .map_err(http_error)?;
    Ok(Json(details))
}

pub(crate) async fn http_edit_list(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<String>,
    headers: HeaderMap,
    Json(rename): Json<ListRename>,
) -> Result<Json<ListSummary>, HttpError> {
    let user = authenticate(&state, &headers).await?;
    let renamed = edit_list(&state.api, &user, &ListId::new(list_id), rename)
        .await
        .map_err(http_error)?;
    Ok(Json(renamed))
}

/// Internal broadcast endpoint, served only on the internal listener. A list
/// with no running coordinator receives nothing and none is started.
pub(crate) async fn internal_broadcast(
    State(state): State<Arc<AppState>>,
    Path(list_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let list_id = ListId::new(list_id);
    match deliver_internal(&state, &list_id, &headers, &body).await {
        Ok(delivered) => {
            info!(%list_id, delivered, "internal broadcast delivered");
            Json(DeliveryReceipt { delivered }).into_response()
        }
        Err(err) => {
            warn!(%list_id, error = %err, "internal broadcast refused");
            http_error(err.into()).into_response()
        }
    }
}

async fn deliver_internal(
    state: &AppState,
    list_id: &ListId,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<usize, RealtimeError> {
    if header_value(headers, INTERNAL_HEADER) != Some("true") {
        return Err(RealtimeError::MalformedEvent(format!(
            "{INTERNAL_HEADER} must be 'true'"
        )));
    }
    if header_value(headers, NAMESPACE_HEADER) != Some(LIST_NAMESPACE) {
        return Err(RealtimeError::MalformedEvent(format!(
            "{NAMESPACE_HEADER} must be '{LIST_NAMESPACE}'"
        )));
    }
    let room = header_value(headers, ROOM_HEADER)
        .ok_or_else(|| RealtimeError::MalformedEvent(format!("missing {ROOM_HEADER}")))?;
    let envelope = parse_internal(list_id, room, body)?;
    state.registry.deliver(list_id, envelope).await
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
