pub mod api_client;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod reconcile;
pub mod subscriber;
pub mod view;
pub mod view_state;

pub use api_client::ListApiClient;
pub use cache::{CollectionSnapshot, ItemCache, ItemPatch};
pub use dispatcher::{EventDispatcher, Subscription};
pub use error::ClientError;
pub use filter::visible_items;
pub use reconcile::{spawn_refetch_worker, ItemFetcher, OptimisticPatch, Reconciler};
pub use subscriber::{socket_url, ListEventSubscriber};
pub use view::{ListView, ListViewConfig};
pub use view_state::ListViewState;
