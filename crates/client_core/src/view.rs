use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use shared::{
    domain::{ItemId, ListId, SessionId, UserId},
    protocol::{ItemSnapshot, ItemUpdate, ItemsFilter, ListEvent, ListEventKind, NewItem, PresenceUser},
};
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    api_client::ListApiClient,
    cache::{ItemCache, ItemPatch},
    dispatcher::{EventDispatcher, Subscription},
    error::ClientError,
    filter::visible_items,
    reconcile::{spawn_refetch_worker, ItemFetcher, OptimisticPatch, Reconciler},
    subscriber::ListEventSubscriber,
    view_state::ListViewState,
};

#[derive(Debug, Clone)]
pub struct ListViewConfig {
    pub server_url: String,
    pub list_id: ListId,
    pub session_id: SessionId,
    pub current_user: UserId,
}

/// A list open on screen: one socket, one dispatcher, one view state.
pub struct ListView {
    list_id: ListId,
    api: Arc<ListApiClient>,
    reconciler: Arc<Reconciler>,
    subscriptions: Vec<Subscription>,
    presence: Arc<Mutex<Vec<PresenceUser>>>,
    state: ListViewState,
    subscriber: ListEventSubscriber,
    refetch_worker: JoinHandle<()>,
}

impl ListView {
    pub async fn mount(config: ListViewConfig, api: Arc<ListApiClient>) -> Result<Self, ClientError> {
        let list_id = config.list_id.clone();
        let cache = Arc::new(ItemCache::new());
        let (reconciler, queue) = Reconciler::new(Arc::clone(&cache));
        let dispatcher = EventDispatcher::new();

        let mut subscriptions = reconciler.install(&dispatcher, &list_id);
        let presence = Arc::new(Mutex::new(Vec::new()));
        subscriptions.push(register_presence(
            &dispatcher,
            Arc::clone(&presence),
            config.current_user.clone(),
        ));

        let fetcher: Arc<dyn ItemFetcher> = api.clone();
        let refetch_worker = spawn_refetch_worker(cache, fetcher, queue);
        reconciler.schedule_refetch(&list_id);

        let subscriber = match ListEventSubscriber::connect(
            &config.server_url,
            &list_id,
            &config.session_id,
            dispatcher,
        )
        .await
        {
            Ok(subscriber) => subscriber,
            Err(err) => {
                refetch_worker.abort();
                return Err(err);
            }
        };
        info!(%list_id, "list view mounted");

        Ok(Self {
            state: ListViewState::new(list_id.clone()),
            list_id,
            api,
            reconciler,
            subscriptions,
            presence,
            subscriber,
            refetch_worker,
        })
    }

    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    pub fn state(&self) -> &ListViewState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ListViewState {
        &mut self.state
    }

    /// Cached items in server order; empty until the first fetch lands.
    pub fn items(&self) -> Vec<ItemSnapshot> {
        self.reconciler
            .cache()
            .get(&self.list_id)
            .unwrap_or_default()
    }

    pub fn visible_items(&self, filter: &ItemsFilter) -> Vec<ItemSnapshot> {
        visible_items(&self.items(), filter, &self.state)
    }

    /// Other users currently viewing the list.
    pub fn connected_users(&self) -> Vec<PresenceUser> {
        self.presence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        !self.subscriber.is_closed()
    }

    pub async fn create_item(&self, item: NewItem) -> Result<ItemSnapshot, ClientError> {
        let provisional = provisional_snapshot(&item);
        let mutation = self.api.create_item(&self.list_id, &item);
        self.reconciler
            .run_optimistic(&self.list_id, OptimisticPatch::Prepend(provisional), mutation)
            .await
    }

    pub async fn update_item(
        &self,
        item_id: &ItemId,
        update: ItemUpdate,
    ) -> Result<ItemSnapshot, ClientError> {
        let patch = OptimisticPatch::Merge {
            item_id: item_id.clone(),
            patch: ItemPatch::from(&update),
        };
        let mutation = self.api.update_item(&self.list_id, item_id, &update);
        self.reconciler
            .run_optimistic(&self.list_id, patch, mutation)
            .await
    }

    pub async fn mark_watched(&self, item_id: &ItemId) -> Result<ItemSnapshot, ClientError> {
        let patch = OptimisticPatch::Merge {
            item_id: item_id.clone(),
            patch: ItemPatch::watched_at(Some(Utc::now())),
        };
        let mutation = self.api.mark_watched(&self.list_id, item_id);
        self.reconciler
            .run_optimistic(&self.list_id, patch, mutation)
            .await
    }

    pub async fn mark_unwatched(&self, item_id: &ItemId) -> Result<ItemSnapshot, ClientError> {
        let patch = OptimisticPatch::Merge {
            item_id: item_id.clone(),
            patch: ItemPatch::watched_at(None),
        };
        let mutation = self.api.mark_unwatched(&self.list_id, item_id);
        self.reconciler
            .run_optimistic(&self.list_id, patch, mutation)
            .await
    }

    pub async fn remove_item(&self, item_id: &ItemId) -> Result<(), ClientError> {
        let patch = OptimisticPatch::Remove(item_id.clone());
        let mutation = self.api.remove_item(&self.list_id, item_id);
        self.reconciler
            .run_optimistic(&self.list_id, patch, mutation)
            .await
    }

    /// Closes the socket, unregisters every handler and stops the refetch
    /// worker. The view state goes with it.
    pub async fn unmount(self) {
        let Self {
            list_id,
            subscriptions,
            subscriber,
            refetch_worker,
            ..
        } = self;
        subscriber.close().await;
        drop(subscriptions);
        refetch_worker.abort();
        info!(%list_id, "list view unmounted");
    }
}

fn register_presence(
    dispatcher: &Arc<EventDispatcher>,
    presence: Arc<Mutex<Vec<PresenceUser>>>,
    current_user: UserId,
) -> Subscription {
    dispatcher.register(ListEventKind::UsersUpdated, move |event| {
        if let ListEvent::UsersUpdated { users } = event {
            let others = users
                .iter()
                .filter(|user| user.id != current_user)
                .cloned()
                .collect();
            *presence.lock().unwrap_or_else(PoisonError::into_inner) = others;
        }
    })
}

/// Stand-in shown until the server's copy arrives with the next refetch.
fn provisional_snapshot(item: &NewItem) -> ItemSnapshot {
    ItemSnapshot {
        id: ItemId::generate(),
        kind: item.kind,
        external_id: item.external_id,
        title: item.title.clone(),
        overview: item.overview.clone(),
        duration: item.duration,
        episode_count: item.episode_count,
        rating: item.rating,
        release_date: item.release_date,
        poster_url: item.poster_url.clone(),
        watched_at: None,
        priority: item.priority,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
