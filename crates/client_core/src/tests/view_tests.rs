use super::*;
use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::{
        ws::{Message as ServerMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::TimeZone;
use shared::{
    domain::ItemKind,
    error::{ApiError, ErrorCode},
};

type Items = Arc<Mutex<Vec<ItemSnapshot>>>;

fn item(id: &str, title: &str) -> ItemSnapshot {
    ItemSnapshot {
        id: ItemId::new(id),
        kind: ItemKind::Movie,
        external_id: None,
        title: title.into(),
        overview: None,
        duration: None,
        episode_count: None,
        rating: None,
        release_date: None,
        poster_url: None,
        watched_at: None,
        priority: 0,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    }
}

async fn list_items(State(items): State<Items>) -> Json<Vec<ItemSnapshot>> {
    Json(items.lock().unwrap().clone())
}

async fn create_item(State(items): State<Items>, Json(draft): Json<NewItem>) -> Response {
    if draft.title == "reject me" {
        let body = ApiError::new(ErrorCode::Validation, "title rejected");
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }
    let created = item(&format!("srv-{}", draft.title), &draft.title);
    items.lock().unwrap().insert(0, created.clone());
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn remove_item(
    State(items): State<Items>,
    Path((_list_id, item_id)): Path<(String, String)>,
) -> Response {
    let mut items = items.lock().unwrap();
    let before = items.len();
    items.retain(|item| item.id.as_str() != item_id);
    if items.len() == before {
        let body = ApiError::new(ErrorCode::NotFound, "item not found");
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn mark_watched_unavailable() -> Response {
    let body = ApiError::new(ErrorCode::Internal, "database unavailable");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

async fn list_socket(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(announce_presence)
}

async fn announce_presence(mut socket: WebSocket) {
    let presence = ListEvent::UsersUpdated {
        users: vec![
            PresenceUser {
                id: UserId::new("ann"),
                name: "Ann".into(),
            },
            PresenceUser {
                id: UserId::new("bob"),
                name: "Bob".into(),
            },
        ],
    };
    if socket
        .send(ServerMessage::Text(presence.to_wire().unwrap()))
        .await
        .is_err()
    {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if matches!(message, ServerMessage::Close(_)) {
            break;
        }
    }
}

async fn serve(items: Items) -> SocketAddr {
    let app = Router::new()
        .route(
            "/api/lists/:list_id/items",
            get(list_items).post(create_item),
        )
        .route("/api/lists/:list_id/items/:item_id", delete(remove_item))
        .route(
            "/api/lists/:list_id/items/:item_id/watched",
            post(mark_watched_unavailable),
        )
        .route("/ws/list/:list_id", get(list_socket))
        .with_state(items);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

async fn mounted(items: Vec<ItemSnapshot>) -> (ListView, Items) {
    let items: Items = Arc::new(Mutex::new(items));
    let addr = serve(items.clone()).await;
    let server_url = format!("http://{addr}");
    let session_id = SessionId::new("sess-ann");
    let api = Arc::new(ListApiClient::new(&server_url, session_id.clone()).expect("client"));
    let view = ListView::mount(
        ListViewConfig {
            server_url,
            list_id: ListId::new("L1"),
            session_id,
            current_user: UserId::new("ann"),
        },
        api,
    )
    .await
    .expect("mount");
    (view, items)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached");
}

fn ids(items: &[ItemSnapshot]) -> Vec<String> {
    items.iter().map(|item| item.id.to_string()).collect()
}

#[tokio::test]
async fn mount_loads_items_and_tracks_other_viewers() {
    let (view, _items) = mounted(vec![item("i1", "Alien"), item("i2", "Heat")]).await;

    eventually(|| ids(&view.items()) == vec!["i1", "i2"]).await;
    eventually(|| !view.connected_users().is_empty()).await;

    let users = view.connected_users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id.as_str(), "bob");
    assert!(view.is_connected());
    assert_eq!(view.state().list_id(), view.list_id());

    view.unmount().await;
}

#[tokio::test]
async fn created_item_is_replaced_by_server_copy() {
    let (view, _items) = mounted(vec![item("i1", "Alien")]).await;
    eventually(|| ids(&view.items()) == vec!["i1"]).await;

    let created = view
        .create_item(NewItem::titled("Heat"))
        .await
        .expect("create");

    assert_eq!(created.id.as_str(), "srv-Heat");
    eventually(|| ids(&view.items()) == vec!["srv-Heat", "i1"]).await;
    view.unmount().await;
}

#[tokio::test]
async fn rejected_create_rolls_back() {
    let (view, _items) = mounted(vec![item("i1", "Alien")]).await;
    eventually(|| ids(&view.items()) == vec!["i1"]).await;

    let err = view
        .create_item(NewItem::titled("reject me"))
        .await
        .expect_err("rejected");

    assert!(matches!(
        err,
        ClientError::Api {
            status: 400,
            code: Some(ErrorCode::Validation),
            ..
        }
    ));
    assert_eq!(ids(&view.items()), vec!["i1"]);
    view.unmount().await;
}

#[tokio::test]
async fn failed_mark_watched_leaves_the_item_unwatched() {
    let (view, _items) = mounted(vec![item("i1", "Alien"), item("i2", "Heat")]).await;
    eventually(|| ids(&view.items()) == vec!["i1", "i2"]).await;

    let err = view
        .mark_watched(&ItemId::new("i1"))
        .await
        .expect_err("server error");

    assert!(matches!(
        err,
        ClientError::Api {
            status: 500,
            code: Some(ErrorCode::Internal),
            ..
        }
    ));
    assert_eq!(view.items(), vec![item("i1", "Alien"), item("i2", "Heat")]);
    view.unmount().await;
}

#[tokio::test]
async fn removing_a_missing_item_reports_not_found() {
    let (view, _items) = mounted(vec![item("i1", "Alien")]).await;
    eventually(|| ids(&view.items()) == vec!["i1"]).await;

    let err = view
        .remove_item(&ItemId::new("ghost"))
        .await
        .expect_err("missing");

    assert_eq!(err.code(), Some(ErrorCode::NotFound));
    assert_eq!(ids(&view.items()), vec!["i1"]);
    view.unmount().await;
}

#[tokio::test]
async fn visible_items_follow_view_state() {
    let (mut view, _items) = mounted(vec![item("i1", "Alien"), item("i2", "Heat")]).await;
    eventually(|| view.items().len() == 2).await;

    view.state_mut().set_search_query("hea");

    assert_eq!(ids(&view.visible_items(&ItemsFilter::default())), vec!["i2"]);
    view.unmount().await;
}
