use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ItemId, ListId, SessionId},
    error::ApiError,
    protocol::{
        endpoint_url, ItemSnapshot, ItemUpdate, ItemsFilter, ListDetails, ListRename, ListSummary,
        NewItem, NewList,
    },
};
use url::Url;

use crate::{error::ClientError, reconcile::ItemFetcher};

/// HTTP client for the list item routes, authenticated with a session token.
#[derive(Clone)]
pub struct ListApiClient {
    http: Client,
    base: Url,
    session_id: SessionId,
}

impl ListApiClient {
    pub fn new(server_url: &str, session_id: SessionId) -> Result<Self, ClientError> {
        let base = Url::parse(server_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ClientError::InvalidUrl(server_url.to_string()))?;
        Ok(Self {
            http: Client::new(),
            base,
            session_id,
        })
    }

    /// Lists the session's user can open.
    pub async fn lists(&self) -> Result<Vec<ListSummary>, ClientError> {
        let request = self.http.get(self.endpoint(["api", "lists"])?);
        self.send_json(request).await
    }

    pub async fn create_list(&self, name: &str) -> Result<ListSummary, ClientError> {
        let body = NewList {
            name: name.to_string(),
        };
        let request = self.http.post(self.endpoint(["api", "lists"])?).json(&body);
        self.send_json(request).await
    }

    pub async fn rename_list(
        &self,
        list_id: &ListId,
        new_name: &str,
    ) -> Result<ListSummary, ClientError> {
        let body = ListRename {
            new_name: new_name.to_string(),
        };
        let request = self
            .http
            .patch(self.endpoint(["api", "lists", list_id.as_str()])?)
            .json(&body);
        self.send_json(request).await
    }

    pub async fn list_details(&self, list_id: &ListId) -> Result<ListDetails, ClientError> {
        let request = self
            .http
            .get(self.endpoint(["api", "lists", list_id.as_str()])?);
        self.send_json(request).await
    }

    pub async fn list_items(
        &self,
        list_id: &ListId,
        filter: &ItemsFilter,
    ) -> Result<Vec<ItemSnapshot>, ClientError> {
        let request = self.http.get(self.items_url(list_id)?).query(filter);
        self.send_json(request).await
    }

    pub async fn create_item(
        &self,
        list_id: &ListId,
        item: &NewItem,
    ) -> Result<ItemSnapshot, ClientError> {
        let request = self.http.post(self.items_url(list_id)?).json(item);
        self.send_json(request).await
    }

    pub async fn update_item(
        &self,
        list_id: &ListId,
        item_id: &ItemId,
        update: &ItemUpdate,
    ) -> Result<ItemSnapshot, ClientError> {
        let request = self
            .http
            .patch(self.item_url(list_id, item_id, None)?)
            .json(update);
        self.send_json(request).await
    }

    pub async fn mark_watched(
        &self,
        list_id: &ListId,
        item_id: &ItemId,
    ) -> Result<ItemSnapshot, ClientError> {
        let url = self.item_url(list_id, item_id, Some("watched"))?;
        self.send_json(self.http.post(url)).await
    }

    pub async fn mark_unwatched(
        &self,
        list_id: &ListId,
        item_id: &ItemId,
    ) -> Result<ItemSnapshot, ClientError> {
        let url = self.item_url(list_id, item_id, Some("watched"))?;
        self.send_json(self.http.delete(url)).await
    }

    pub async fn remove_item(&self, list_id: &ListId, item_id: &ItemId) -> Result<(), ClientError> {
        let url = self.item_url(list_id, item_id, None)?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, ClientError> {
        endpoint_url(&self.base, segments)
            .ok_or_else(|| ClientError::InvalidUrl(self.base.to_string()))
    }

    fn items_url(&self, list_id: &ListId) -> Result<Url, ClientError> {
        self.endpoint(["api", "lists", list_id.as_str(), "items"])
    }

    fn item_url(
        &self,
        list_id: &ListId,
        item_id: &ItemId,
        action: Option<&str>,
    ) -> Result<Url, ClientError> {
        let segments = ["api", "lists", list_id.as_str(), "items", item_id.as_str()];
        self.endpoint(segments.into_iter().chain(action))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request
            .bearer_auth(self.session_id.as_str())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ApiError>(&body) {
            Ok(api_error) => (Some(api_error.code), api_error.message),
            Err(_) => (None, body),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        Ok(self.send(request).await?.json().await?)
    }
}

#[async_trait]
impl ItemFetcher for ListApiClient {
    async fn fetch_items(&self, list_id: &ListId) -> Result<Vec<ItemSnapshot>, ClientError> {
        self.list_items(list_id, &ItemsFilter::default()).await
    }
}

#[cfg(test)]
#[path = "tests/api_client_tests.rs"]
mod tests;
