use super::*;
use std::collections::BTreeSet;

use proptest::prelude::*;
use shared::{domain::ItemId, protocol::ListEventKind};
use tokio::sync::mpsc::UnboundedReceiver;

fn identity(id: &str, name: &str) -> UserIdentity {
    UserIdentity {
        id: UserId::new(id),
        name: name.into(),
        email: format!("{id}@example.com"),
    }
}

async fn join(
    handle: &CoordinatorHandle,
    user: &UserIdentity,
) -> (ConnectionId, UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection_id = handle.connect(user.clone(), tx).await.expect("connect");
    (connection_id, rx)
}

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<ListEvent> {
    let mut events = Vec::new();
    while let Ok(text) = rx.try_recv() {
        events.push(ListEvent::from_wire(&text).expect("decode"));
    }
    events
}

fn presence_ids(event: &ListEvent) -> Vec<String> {
    match event {
        ListEvent::UsersUpdated { users } => users.iter().map(|u| u.id.to_string()).collect(),
        other => panic!("expected users-updated, got {other:?}"),
    }
}

fn removal(id: &str) -> ListEvent {
    ListEvent::ItemRemoved {
        item_id: ItemId::new(id),
    }
}

#[tokio::test]
async fn first_connection_sees_itself_in_presence() {
    let handle = CoordinatorHandle::spawn(ListId::new("L"));
    let ann = identity("a", "Ann");

    let (_, mut rx) = join(&handle, &ann).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(presence_ids(&events[0]), vec!["a"]);
}

#[tokio::test]
async fn presence_deduplicates_users_across_tabs() {
    let handle = CoordinatorHandle::spawn(ListId::new("L"));
    let ann = identity("a", "Ann");
    let bob = identity("b", "Bob");

    let (first_tab, _rx1) = join(&handle, &ann).await;
    let (_second_tab, _rx2) = join(&handle, &ann).await;
    let (_, mut bob_rx) = join(&handle, &bob).await;

    let presence = handle.presence().await.expect("presence");
    let ids: Vec<_> = presence.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    handle.disconnect(first_tab).await;
    handle.presence().await.expect("presence");
    let events = drain(&mut bob_rx);
    assert_eq!(presence_ids(events.last().expect("update")), vec!["a", "b"]);
}

#[tokio::test]
async fn closing_a_connection_updates_remaining_peers() {
    let handle = CoordinatorHandle::spawn(ListId::new("L"));
    let (ann_conn, _ann_rx) = join(&handle, &identity("a", "Ann")).await;
    let (_, mut bob_rx) = join(&handle, &identity("b", "Bob")).await;
    drain(&mut bob_rx);

    handle.disconnect(ann_conn).await;
    let presence = handle.presence().await.expect("presence");
    assert_eq!(presence.len(), 1);

    let events = drain(&mut bob_rx);
    assert_eq!(events.len(), 1);
    assert_eq!(presence_ids(&events[0]), vec!["b"]);
}

#[tokio::test]
async fn closing_unknown_connection_is_a_no_op() {
    let handle = CoordinatorHandle::spawn(ListId::new("L"));
    let (ann_conn, mut ann_rx) = join(&handle, &identity("a", "Ann")).await;
    drain(&mut ann_rx);

    handle.disconnect(ann_conn + 100).await;
    handle.presence().await.expect("presence");

    assert!(drain(&mut ann_rx).is_empty());
}

#[tokio::test]
async fn broadcast_skips_every_connection_of_excluded_users() {
    let handle = CoordinatorHandle::spawn(ListId::new("L"));
    let (_, mut ann_tab1) = join(&handle, &identity("a", "Ann")).await;
    let (_, mut ann_tab2) = join(&handle, &identity("a", "Ann")).await;
    let (_, mut bob_rx) = join(&handle, &identity("b", "Bob")).await;
    let (_, mut cid_rx) = join(&handle, &identity("c", "Cid")).await;
    for rx in [&mut ann_tab1, &mut ann_tab2, &mut bob_rx, &mut cid_rx] {
        drain(rx);
    }

    let delivered = handle
        .broadcast(BroadcastEnvelope::new(removal("x"), vec![UserId::new("a")]))
        .await
        .expect("broadcast");
    assert_eq!(delivered, 2);

    assert!(drain(&mut ann_tab1).is_empty());
    assert!(drain(&mut ann_tab2).is_empty());
    for rx in [&mut bob_rx, &mut cid_rx] {
        let events = drain(rx);
        assert_eq!(events, vec![removal("x")]);
        assert_eq!(events[0].kind(), ListEventKind::ItemRemoved);
    }
}

#[test]
fn internal_request_rejects_room_mismatch_and_bad_body() {
    let list = ListId::new("L");
    let envelope = BroadcastEnvelope::new(removal("x"), vec![UserId::new("a")]);
    let body = serde_json::to_vec(&envelope).expect("body");

    let err = parse_internal(&list, "other", &body).expect_err("room mismatch");
    assert!(matches!(err, RealtimeError::MalformedEvent(_)));

    let err = parse_internal(&list, "L", b"{\"event\":{\"type\":\"nope\"}}").expect_err("bad body");
    assert!(matches!(err, RealtimeError::MalformedEvent(_)));

    assert_eq!(parse_internal(&list, "L", &body).expect("parse"), envelope);
}

#[tokio::test]
async fn coordinator_without_connections_stops_after_idle_timeout() {
    let handle =
        CoordinatorHandle::spawn_with_idle_timeout(ListId::new("L"), Duration::from_millis(50));
    let (conn, _rx) = join(&handle, &identity("a", "Ann")).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!handle.is_closed(), "an open connection keeps it running");

    handle.disconnect(conn).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("coordinator stopped");

    let err = handle.presence().await.expect_err("stopped");
    assert!(matches!(err, RealtimeError::PartitionLookup(_)));
}

#[tokio::test]
async fn stopped_coordinator_reports_partition_lookup() {
    let handle = CoordinatorHandle::spawn(ListId::new("L"));
    handle.shutdown().await;
    tokio::task::yield_now().await;

    let err = handle.presence().await.expect_err("stopped");
    assert!(matches!(err, RealtimeError::PartitionLookup(_)));
}

#[derive(Debug, Clone)]
enum Step {
    Connect(usize),
    Disconnect(usize),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            (0..4usize).prop_map(Step::Connect),
            any::<usize>().prop_map(Step::Disconnect),
        ],
        1..24,
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn presence_matches_distinct_open_users(script in steps()) {
        let (expected, reported, last_seen) = runtime().block_on(async move {
            let handle = CoordinatorHandle::spawn(ListId::new("L"));
            let mut open: Vec<(ConnectionId, String, UnboundedReceiver<String>)> = Vec::new();
            let mut seen: HashMap<ConnectionId, Vec<String>> = HashMap::new();

            for step in script {
                match step {
                    Step::Connect(user) => {
                        let user = identity(&format!("u{user}"), "User");
                        let (conn, rx) = join(&handle, &user).await;
                        open.push((conn, user.id.to_string(), rx));
                    }
                    Step::Disconnect(pick) if !open.is_empty() => {
                        let (conn, _, _) = open.remove(pick % open.len());
                        handle.disconnect(conn).await;
                    }
                    Step::Disconnect(_) => {}
                }
            }

            let reported: Vec<String> = handle
                .presence()
                .await
                .expect("presence")
                .iter()
                .map(|user| user.id.to_string())
                .collect();
            for (conn, _, rx) in open.iter_mut() {
                if let Some(last) = drain(rx).last() {
                    seen.insert(*conn, presence_ids(last));
                }
            }
            let expected: Vec<String> = open
                .iter()
                .map(|(_, user, _)| user.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let last_seen: Vec<Option<Vec<String>>> = open
                .iter()
                .map(|(conn, _, _)| seen.get(conn).cloned())
                .collect();
            (expected, reported, last_seen)
        });

        prop_assert_eq!(&reported, &expected);
        for seen in last_seen {
            prop_assert_eq!(seen.as_ref(), Some(&expected));
        }
    }

    #[test]
    fn broadcast_reaches_exactly_the_non_excluded_connections(
        users in prop::collection::vec(0..5usize, 1..10),
        excluded in prop::collection::btree_set(0..5usize, 0..5),
    ) {
        let except: Vec<UserId> = excluded.iter().map(|u| UserId::new(format!("u{u}"))).collect();
        let (delivered, received) = runtime().block_on(async {
            let handle = CoordinatorHandle::spawn(ListId::new("L"));
            let mut receivers = Vec::new();
            for user in &users {
                let (_, rx) = join(&handle, &identity(&format!("u{user}"), "User")).await;
                receivers.push(rx);
            }
            for rx in receivers.iter_mut() {
                drain(rx);
            }

            let delivered = handle
                .broadcast(BroadcastEnvelope::new(removal("x"), except.clone()))
                .await
                .expect("broadcast");
            let received: Vec<Vec<ListEvent>> = receivers.iter_mut().map(drain).collect();
            (delivered, received)
        });

        let expected = users.iter().filter(|u| !excluded.contains(u)).count();
        prop_assert_eq!(delivered, expected);
        for (user, events) in users.iter().zip(received) {
            if excluded.contains(user) {
                prop_assert!(events.is_empty());
            } else {
                prop_assert_eq!(events, vec![removal("x")]);
            }
        }
    }
}
