use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{ItemId, ListId, SessionId},
    error::{ApiError, ErrorCode},
    protocol::{
        ItemSnapshot, ItemUpdate, ItemsFilter, ListDetails, ListEvent, ListRename, ListSummary,
        NewItem, NewList, UserIdentity,
    },
};
use storage::Storage;
use tracing::info;

pub mod bridge;

pub use bridge::{broadcast_best_effort, BroadcastBridge, HttpBroadcastBridge};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub bridge: Arc<dyn BroadcastBridge>,
}

pub async fn authenticate_session(
    ctx: &ApiContext,
    session_id: Option<&SessionId>,
) -> Result<UserIdentity, ApiError> {
    let Some(session_id) = session_id else {
        return Err(ApiError::new(ErrorCode::Unauthorized, "missing session"));
    };
    ctx.storage
        .valid_user_session(session_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "invalid or expired session"))
}

pub async fn ensure_list_access(
    ctx: &ApiContext,
    list_id: &ListId,
    user: &UserIdentity,
) -> Result<(), ApiError> {
    let allowed = ctx
        .storage
        .has_list_access(list_id, &user.id)
        .await
        .map_err(internal)?;
    if !allowed {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "user does not have access to this list",
        ));
    }
    Ok(())
}

pub async fn get_lists(
    ctx: &ApiContext,
    user: &UserIdentity,
) -> Result<Vec<ListSummary>, ApiError> {
    ctx.storage.lists_for_user(&user.id).await.map_err(internal)
}

/// Creates a list owned by `user`, who gets access to it immediately.
pub async fn create_list(
    ctx: &ApiContext,
    user: &UserIdentity,
    list: NewList,
) -> Result<ListSummary, ApiError> {
    let name = list_name(&list.name)?;
    let id = ctx
        .storage
        .create_list(name, &user.id)
        .await
        .map_err(internal)?;
    info!(list_id = %id, user_id = %user.id, "list created");
    Ok(ListSummary {
        id,
        name: name.to_string(),
    })
}

pub async fn edit_list(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    rename: ListRename,
) -> Result<ListSummary, ApiError> {
    ensure_list_access(ctx, list_id, user).await?;
    let name = list_name(&rename.new_name)?;
    ctx.storage
        .rename_list(list_id, name)
        .await
        .map_err(internal)?
        .ok_or_else(list_not_found)
}

pub async fn get_details(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
) -> Result<ListDetails, ApiError> {
    ensure_list_access(ctx, list_id, user).await?;
    ctx.storage
        .list_details(list_id)
        .await
        .map_err(internal)?
        .ok_or_else(list_not_found)
}

fn list_name(raw: &str) -> Result<&str, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "list name must not be empty"));
    }
    Ok(name)
}

fn list_not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "list not found")
}

pub async fn list_items(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    filter: ItemsFilter,
) -> Result<Vec<ItemSnapshot>, ApiError> {
    ensure_list_access(ctx, list_id, user).await?;
    ctx.storage
        .list_items(list_id, &filter)
        .await
        .map_err(internal)
}

pub async fn create_item(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    item: NewItem,
) -> Result<ItemSnapshot, ApiError> {
    ensure_list_access(ctx, list_id, user).await?;
    if item.title.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "title must not be empty"));
    }

    let created = ctx
        .storage
        .insert_item(list_id, &item)
        .await
        .map_err(internal)?;
    info!(%list_id, item_id = %created.id, user_id = %user.id, "item created");

    broadcast_best_effort(
        ctx.bridge.as_ref(),
        list_id,
        ListEvent::ItemCreated {
            item: created.clone(),
        },
        vec![user.id.clone()],
    )
    .await;
    Ok(created)
}

pub async fn update_item(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    item_id: &ItemId,
    update: ItemUpdate,
) -> Result<ItemSnapshot, ApiError> {
    ensure_list_access(ctx, list_id, user).await?;
    if update.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "update has no fields"));
    }
    if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::new(ErrorCode::Validation, "title must not be empty"));
    }

    let updated = ctx
        .storage
        .update_item(list_id, item_id, &update)
        .await
        .map_err(internal)?
        .ok_or_else(item_not_found)?;
    info!(%list_id, %item_id, user_id = %user.id, "item updated");

    broadcast_updated(ctx, user, list_id, &updated).await;
    Ok(updated)
}

pub async fn mark_watched(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    item_id: &ItemId,
) -> Result<ItemSnapshot, ApiError> {
    set_watched(ctx, user, list_id, item_id, true).await
}

pub async fn mark_unwatched(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    item_id: &ItemId,
) -> Result<ItemSnapshot, ApiError> {
    set_watched(ctx, user, list_id, item_id, false).await
}

pub async fn remove_item(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    item_id: &ItemId,
) -> Result<(), ApiError> {
    ensure_list_access(ctx, list_id, user).await?;
    let removed = ctx
        .storage
        .remove_item(list_id, item_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(item_not_found());
    }
    info!(%list_id, %item_id, user_id = %user.id, "item removed");

    broadcast_best_effort(
        ctx.bridge.as_ref(),
        list_id,
        ListEvent::ItemRemoved {
            item_id: item_id.clone(),
        },
        vec![user.id.clone()],
    )
    .await;
    Ok(())
}

async fn set_watched(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    item_id: &ItemId,
    watched: bool,
) -> Result<ItemSnapshot, ApiError> {
    ensure_list_access(ctx, list_id, user).await?;
    let watched_at = watched.then(Utc::now);
    let updated = ctx
        .storage
        .set_watched_at(list_id, item_id, watched_at)
        .await
        .map_err(internal)?
        .ok_or_else(item_not_found)?;
    info!(%list_id, %item_id, user_id = %user.id, watched, "item watch state changed");

    broadcast_updated(ctx, user, list_id, &updated).await;
    Ok(updated)
}

async fn broadcast_updated(
    ctx: &ApiContext,
    user: &UserIdentity,
    list_id: &ListId,
    item: &ItemSnapshot,
) {
    broadcast_best_effort(
        ctx.bridge.as_ref(),
        list_id,
        ListEvent::ItemUpdated { item: item.clone() },
        vec![user.id.clone()],
    )
    .await;
}

fn item_not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "item not found")
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
