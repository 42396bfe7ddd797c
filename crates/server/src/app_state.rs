use std::sync::Arc;

use server_api::ApiContext;

use crate::registry::ListRegistry;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) registry: Arc<ListRegistry>,
}
