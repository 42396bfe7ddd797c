use std::{collections::BTreeSet, future::Future, sync::Arc};

use async_trait::async_trait;
use shared::{
    domain::{ItemId, ListId},
    protocol::{ItemSnapshot, ListEvent, ListEventKind},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    cache::{CollectionSnapshot, ItemCache, ItemPatch},
    dispatcher::{EventDispatcher, Subscription},
    error::ClientError,
};

/// Source of authoritative item collections.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    async fn fetch_items(&self, list_id: &ListId) -> Result<Vec<ItemSnapshot>, ClientError>;
}

pub type RefetchQueue = mpsc::UnboundedReceiver<ListId>;

/// Speculative change applied to the cache before the server confirms it.
#[derive(Debug, Clone)]
pub enum OptimisticPatch {
    Prepend(ItemSnapshot),
    Merge { item_id: ItemId, patch: ItemPatch },
    Remove(ItemId),
}

pub struct Reconciler {
    cache: Arc<ItemCache>,
    refetch: mpsc::UnboundedSender<ListId>,
}

impl Reconciler {
    pub fn new(cache: Arc<ItemCache>) -> (Arc<Self>, RefetchQueue) {
        let (refetch, queue) = mpsc::unbounded_channel();
        (Arc::new(Self { cache, refetch }), queue)
    }

    pub fn cache(&self) -> &Arc<ItemCache> {
        &self.cache
    }

    /// Applies `patch`, then awaits `mutation`. A failed mutation puts the
    /// collection back exactly as it was; a successful one schedules a refetch.
    pub async fn run_optimistic<T, F>(
        &self,
        list_id: &ListId,
        patch: OptimisticPatch,
        mutation: F,
    ) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let snapshot = self.apply_patch(list_id, patch);
        match mutation.await {
            Ok(value) => {
                self.schedule_refetch(list_id);
                Ok(value)
            }
            Err(err) => {
                warn!(%list_id, error = %err, "mutation failed; reverting optimistic change");
                self.cache.restore(snapshot);
                Err(err)
            }
        }
    }

    /// Folds a peer's change into the cache. Presence events are not item
    /// data and are ignored.
    pub fn apply_remote(&self, list_id: &ListId, event: &ListEvent) {
        let patch = match event {
            ListEvent::UsersUpdated { .. } => return,
            ListEvent::ItemCreated { item } => OptimisticPatch::Prepend(item.clone()),
            ListEvent::ItemUpdated { item } => OptimisticPatch::Merge {
                item_id: item.id.clone(),
                patch: ItemPatch::full(item),
            },
            ListEvent::ItemRemoved { item_id } => OptimisticPatch::Remove(item_id.clone()),
        };
        self.apply_patch(list_id, patch);
        debug!(%list_id, kind = event.kind().as_str(), "applied remote list event");
        self.schedule_refetch(list_id);
    }

    /// Registers the item handlers for `list_id` on `dispatcher`.
    pub fn install(
        self: &Arc<Self>,
        dispatcher: &Arc<EventDispatcher>,
        list_id: &ListId,
    ) -> Vec<Subscription> {
        [
            ListEventKind::ItemCreated,
            ListEventKind::ItemUpdated,
            ListEventKind::ItemRemoved,
        ]
        .into_iter()
        .map(|kind| {
            let reconciler = Arc::clone(self);
            let list_id = list_id.clone();
            dispatcher.register(kind, move |event| reconciler.apply_remote(&list_id, event))
        })
        .collect()
    }

    pub fn schedule_refetch(&self, list_id: &ListId) {
        if self.refetch.send(list_id.clone()).is_err() {
            debug!(%list_id, "refetch worker stopped; skipping refetch");
        }
    }

    fn apply_patch(&self, list_id: &ListId, patch: OptimisticPatch) -> CollectionSnapshot {
        match patch {
            OptimisticPatch::Prepend(item) => self.cache.patch_collection(list_id, |items| {
                let mut next = Vec::with_capacity(items.len() + 1);
                let item_id = item.id.clone();
                next.push(item);
                next.extend(items.into_iter().filter(|existing| existing.id != item_id));
                next
            }),
            OptimisticPatch::Merge { item_id, patch } => {
                self.cache.patch_item(list_id, &item_id, move |_| patch)
            }
            OptimisticPatch::Remove(item_id) => self.cache.patch_collection(list_id, |items| {
                items.into_iter().filter(|item| item.id != item_id).collect()
            }),
        }
    }
}

/// Replaces cached collections with fetched ones until the queue closes.
/// Requests that pile up while a fetch is running are coalesced per list.
pub fn spawn_refetch_worker(
    cache: Arc<ItemCache>,
    fetcher: Arc<dyn ItemFetcher>,
    mut queue: RefetchQueue,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(first) = queue.recv().await {
            let mut pending = BTreeSet::from([first]);
            while let Ok(next) = queue.try_recv() {
                pending.insert(next);
            }
            for list_id in pending {
                match fetcher.fetch_items(&list_id).await {
                    Ok(items) => {
                        debug!(%list_id, count = items.len(), "refetched list items");
                        cache.replace(&list_id, items);
                    }
                    Err(err) => warn!(%list_id, error = %err, "list refetch failed"),
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
