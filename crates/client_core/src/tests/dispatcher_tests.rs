use super::*;
use shared::{
    domain::{ItemId, UserId},
    protocol::PresenceUser,
};

fn removal(id: &str) -> ListEvent {
    ListEvent::ItemRemoved {
        item_id: ItemId::new(id),
    }
}

fn presence(ids: &[&str]) -> ListEvent {
    ListEvent::UsersUpdated {
        users: ids
            .iter()
            .map(|id| PresenceUser {
                id: UserId::new(*id),
                name: id.to_uppercase(),
            })
            .collect(),
    }
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&ListEvent) + Send + Sync>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let make = move |label: &str| -> Box<dyn Fn(&ListEvent) + Send + Sync> {
        let sink = sink.clone();
        let label = label.to_string();
        Box::new(move |event: &ListEvent| {
            sink.lock()
                .unwrap()
                .push(format!("{label}:{}", event.kind().as_str()));
        })
    };
    (seen, make)
}

#[test]
fn dispatch_runs_only_handlers_for_the_event_kind() {
    let dispatcher = EventDispatcher::new();
    let (seen, make) = recorder();
    let _removed = dispatcher.register(ListEventKind::ItemRemoved, make("removed"));
    let _users = dispatcher.register(ListEventKind::UsersUpdated, make("users"));

    assert_eq!(dispatcher.dispatch(&removal("i1")), 1);
    assert_eq!(dispatcher.dispatch(&presence(&["a"])), 1);

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["removed:item-removed", "users:users-updated"]
    );
}

#[test]
fn handlers_run_in_registration_order() {
    let dispatcher = EventDispatcher::new();
    let (seen, make) = recorder();
    let _first = dispatcher.register(ListEventKind::ItemRemoved, make("first"));
    let _second = dispatcher.register(ListEventKind::ItemRemoved, make("second"));

    assert_eq!(dispatcher.dispatch(&removal("i1")), 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["first:item-removed", "second:item-removed"]
    );
}

#[test]
fn event_without_handlers_is_ignored() {
    let dispatcher = EventDispatcher::new();
    assert_eq!(dispatcher.dispatch(&removal("i1")), 0);
}

#[test]
fn dropping_subscription_unregisters_handler() {
    let dispatcher = EventDispatcher::new();
    let (seen, make) = recorder();
    let kept = dispatcher.register(ListEventKind::ItemRemoved, make("kept"));
    let dropped = dispatcher.register(ListEventKind::ItemRemoved, make("dropped"));
    assert_eq!(dispatcher.handler_count(ListEventKind::ItemRemoved), 2);

    drop(dropped);
    assert_eq!(dispatcher.handler_count(ListEventKind::ItemRemoved), 1);
    dispatcher.dispatch(&removal("i1"));
    assert_eq!(*seen.lock().unwrap(), vec!["kept:item-removed"]);

    drop(kept);
    assert_eq!(dispatcher.handler_count(ListEventKind::ItemRemoved), 0);
    assert_eq!(dispatcher.dispatch(&removal("i2")), 0);
}

#[test]
fn subscription_outliving_dispatcher_drops_cleanly() {
    let dispatcher = EventDispatcher::new();
    let subscription = dispatcher.register(ListEventKind::ItemCreated, |_| {});
    drop(dispatcher);
    drop(subscription);
}

#[test]
fn handler_may_register_another_handler_while_dispatching() {
    let dispatcher = EventDispatcher::new();
    let late = Arc::new(Mutex::new(Vec::new()));
    let inner = dispatcher.clone();
    let _outer = dispatcher.register(ListEventKind::UsersUpdated, move |_| {
        let subscription = inner.register(ListEventKind::ItemRemoved, |_| {});
        late.lock().unwrap().push(subscription);
    });

    assert_eq!(dispatcher.dispatch(&presence(&["a"])), 1);
    assert_eq!(dispatcher.handler_count(ListEventKind::ItemRemoved), 1);
}
