use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{ItemId, ItemKind, ListId},
    protocol::{ItemSnapshot, ItemUpdate},
};

/// Shallow field-level merge onto a cached item. `None` leaves a field as is;
/// for nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub kind: Option<ItemKind>,
    pub external_id: Option<Option<i64>>,
    pub title: Option<String>,
    pub overview: Option<Option<String>>,
    pub duration: Option<Option<i64>>,
    pub episode_count: Option<Option<i64>>,
    pub rating: Option<Option<i64>>,
    pub release_date: Option<Option<DateTime<Utc>>>,
    pub poster_url: Option<Option<String>>,
    pub watched_at: Option<Option<DateTime<Utc>>>,
    pub priority: Option<i64>,
}

impl ItemPatch {
    pub fn watched_at(watched_at: Option<DateTime<Utc>>) -> Self {
        Self {
            watched_at: Some(watched_at),
            ..Self::default()
        }
    }

    /// Every field of `item`; merging it makes the cached entry equal to it.
    pub fn full(item: &ItemSnapshot) -> Self {
        Self {
            kind: Some(item.kind),
            external_id: Some(item.external_id),
            title: Some(item.title.clone()),
            overview: Some(item.overview.clone()),
            duration: Some(item.duration),
            episode_count: Some(item.episode_count),
            rating: Some(item.rating),
            release_date: Some(item.release_date),
            poster_url: Some(item.poster_url.clone()),
            watched_at: Some(item.watched_at),
            priority: Some(item.priority),
        }
    }

    pub fn apply(&self, item: &mut ItemSnapshot) {
        if let Some(kind) = self.kind {
            item.kind = kind;
        }
        if let Some(external_id) = self.external_id {
            item.external_id = external_id;
        }
        if let Some(title) = &self.title {
            item.title = title.clone();
        }
        if let Some(overview) = &self.overview {
            item.overview = overview.clone();
        }
        if let Some(duration) = self.duration {
            item.duration = duration;
        }
        if let Some(episode_count) = self.episode_count {
            item.episode_count = episode_count;
        }
        if let Some(rating) = self.rating {
            item.rating = rating;
        }
        if let Some(release_date) = self.release_date {
            item.release_date = release_date;
        }
        if let Some(poster_url) = &self.poster_url {
            item.poster_url = poster_url.clone();
        }
        if let Some(watched_at) = self.watched_at {
            item.watched_at = watched_at;
        }
        if let Some(priority) = self.priority {
            item.priority = priority;
        }
    }
}

impl From<&ItemUpdate> for ItemPatch {
    fn from(update: &ItemUpdate) -> Self {
        Self {
            kind: update.kind,
            title: update.title.clone(),
            overview: update.overview.clone(),
            duration: update.duration,
            episode_count: update.episode_count,
            watched_at: update.watched_at,
            priority: update.priority,
            ..Self::default()
        }
    }
}

/// A list's cached collection as it was before a patch; `None` means nothing
/// was cached.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    list_id: ListId,
    items: Option<Vec<ItemSnapshot>>,
}

impl CollectionSnapshot {
    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    pub fn items(&self) -> Option<&[ItemSnapshot]> {
        self.items.as_deref()
    }
}

/// Client-side item collections keyed by list.
#[derive(Default)]
pub struct ItemCache {
    collections: RwLock<HashMap<ListId, Vec<ItemSnapshot>>>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, list_id: &ListId) -> Option<Vec<ItemSnapshot>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(list_id)
            .cloned()
    }

    pub fn replace(&self, list_id: &ListId, items: Vec<ItemSnapshot>) {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(list_id.clone(), items);
    }

    /// Replaces the collection with `update(previous)`, treating a missing
    /// collection as empty.
    pub fn patch_collection(
        &self,
        list_id: &ListId,
        update: impl FnOnce(Vec<ItemSnapshot>) -> Vec<ItemSnapshot>,
    ) -> CollectionSnapshot {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = collections.get(list_id).cloned();
        let next = update(previous.clone().unwrap_or_default());
        collections.insert(list_id.clone(), next);
        CollectionSnapshot {
            list_id: list_id.clone(),
            items: previous,
        }
    }

    /// Merges `patch(item)` into the cached item with `item_id`; no-op when
    /// the item is not cached.
    pub fn patch_item(
        &self,
        list_id: &ListId,
        item_id: &ItemId,
        patch: impl FnOnce(&ItemSnapshot) -> ItemPatch,
    ) -> CollectionSnapshot {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = collections.get(list_id).cloned();
        if let Some(item) = collections
            .get_mut(list_id)
            .and_then(|items| items.iter_mut().find(|item| &item.id == item_id))
        {
            let merge = patch(&*item);
            merge.apply(item);
        }
        CollectionSnapshot {
            list_id: list_id.clone(),
            items: previous,
        }
    }

    pub fn restore(&self, snapshot: CollectionSnapshot) {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match snapshot.items {
            Some(items) => {
                collections.insert(snapshot.list_id, items);
            }
            None => {
                collections.remove(&snapshot.list_id);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
