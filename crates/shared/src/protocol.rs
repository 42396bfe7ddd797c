use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::{
    domain::{ItemId, ItemKind, ListId, PriorityLabel, UserId},
    error::RealtimeError,
};

/// Marks a request to the coordinator endpoint as coming from the mutation layer.
pub const INTERNAL_HEADER: &str = "x-party-internal";
pub const NAMESPACE_HEADER: &str = "x-party-namespace";
pub const ROOM_HEADER: &str = "x-party-room";
pub const LIST_NAMESPACE: &str = "list";

pub fn list_socket_segments(list_id: &ListId) -> [&str; 3] {
    ["ws", "list", list_id.as_str()]
}

pub fn internal_broadcast_segments(list_id: &ListId) -> [&str; 3] {
    ["parties", LIST_NAMESPACE, list_id.as_str()]
}

/// Appends percent-encoded path segments to `base`, keeping any path prefix
/// it already has. `None` when `base` cannot carry a path.
pub fn endpoint_url<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments);
    Some(url)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl UserIdentity {
    pub fn presence(&self) -> PresenceUser {
        PresenceUser {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUser {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSnapshot {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub external_id: Option<i64>,
    pub title: String,
    pub overview: Option<String>,
    pub duration: Option<i64>,
    pub episode_count: Option<i64>,
    pub rating: Option<i64>,
    pub release_date: Option<DateTime<Utc>>,
    pub poster_url: Option<String>,
    pub watched_at: Option<DateTime<Utc>>,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

impl ItemSnapshot {
    pub fn is_watched(&self) -> bool {
        self.watched_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListEventKind {
    UsersUpdated,
    ItemCreated,
    ItemUpdated,
    ItemRemoved,
}

impl ListEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ListEventKind::UsersUpdated => "users-updated",
            ListEventKind::ItemCreated => "item-created",
            ListEventKind::ItemUpdated => "item-updated",
            ListEventKind::ItemRemoved => "item-removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ListEvent {
    UsersUpdated {
        users: Vec<PresenceUser>,
    },
    ItemCreated {
        item: ItemSnapshot,
    },
    ItemUpdated {
        item: ItemSnapshot,
    },
    ItemRemoved {
        #[serde(rename = "itemId")]
        item_id: ItemId,
    },
}

impl ListEvent {
    pub fn kind(&self) -> ListEventKind {
        match self {
            ListEvent::UsersUpdated { .. } => ListEventKind::UsersUpdated,
            ListEvent::ItemCreated { .. } => ListEventKind::ItemCreated,
            ListEvent::ItemUpdated { .. } => ListEventKind::ItemUpdated,
            ListEvent::ItemRemoved { .. } => ListEventKind::ItemRemoved,
        }
    }

    /// Encodes the event as a text frame. Timestamps are written as RFC 3339
    /// strings and decode back into `DateTime<Utc>`.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_wire(text: &str) -> Result<Self, RealtimeError> {
        serde_json::from_str(text).map_err(|err| RealtimeError::MalformedEvent(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub event: ListEvent,
    #[serde(default)]
    pub except: Vec<UserId>,
}

impl BroadcastEnvelope {
    pub fn new(event: ListEvent, except: Vec<UserId>) -> Self {
        Self { event, except }
    }

    pub fn excludes(&self, user_id: &UserId) -> bool {
        self.except.contains(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSummary {
    pub id: ListId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewList {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRename {
    pub new_name: String,
}

/// Aggregates over a list's items. Durations are summed minutes; a list
/// without rated items has no average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStats {
    pub count: i64,
    pub watched_count: i64,
    pub total_duration: i64,
    pub watched_duration: i64,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDetails {
    pub id: ListId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub users: Vec<UserIdentity>,
    pub stats: ListStats,
}

/// Response body of the internal broadcast endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub delivered: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    #[serde(rename = "type", default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub external_id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub episode_count: Option<i64>,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub priority: i64,
}

impl NewItem {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Movie,
            external_id: None,
            title: title.into(),
            overview: None,
            duration: None,
            episode_count: None,
            rating: None,
            release_date: None,
            poster_url: None,
            priority: 0,
        }
    }
}

/// Partial edit of an item. For nullable columns `Some(None)` clears the value
/// and `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub overview: Option<Option<String>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub duration: Option<Option<i64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub episode_count: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub watched_at: Option<Option<DateTime<Utc>>>,
}

impl ItemUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ItemUpdate::default()
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    Duration,
    Rating,
    #[default]
    DateAdded,
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityFilter {
    High,
    Normal,
    Low,
    #[default]
    Any,
}

impl PriorityFilter {
    pub fn matches(self, priority: i64) -> bool {
        let label = PriorityLabel::from_priority(priority);
        match self {
            PriorityFilter::Any => true,
            PriorityFilter::High => label == PriorityLabel::High,
            PriorityFilter::Normal => label == PriorityLabel::Normal,
            PriorityFilter::Low => label == PriorityLabel::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsFilter {
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub priority: PriorityFilter,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
