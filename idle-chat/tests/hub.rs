use std::time::Duration;

use idle_chat::{
    hub::{Client, Hub, HubOptions},
    outbound::{self, OutboundReceiver},
};
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

fn new_client(hub: &Hub, name: &str) -> (Client, OutboundReceiver) {
    let (outbound, rx) = outbound::channel(None);
    let client = Client {
        id: hub.next_id(),
        name: name.to_string(),
        outbound,
    };
    (client, rx)
}

async fn next(rx: &mut OutboundReceiver) -> Option<String> {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for outbound line")
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test]
async fn registry_tracks_enters_minus_leaves() {
    let (hub, _task) = Hub::spawn(HubOptions::default());

    let mut producers = Vec::new();
    for worker in 0..4 {
        let hub = hub.clone();
        producers.push(tokio::spawn(async move {
            let mut kept = Vec::new();
            for n in 0..10 {
                let name = format!("w{worker}-{n}");
                let (client, rx) = new_client(&hub, &name);
                let id = client.id;
                hub.enter(client);
                if n % 3 == 0 {
                    hub.leave(id);
                } else {
                    kept.push((name, rx));
                }
            }
            kept
        }));
    }

    let mut expected = Vec::new();
    let mut receivers = Vec::new();
    for producer in producers {
        for (name, rx) in producer.await.expect("producer task") {
            expected.push(name);
            receivers.push(rx);
        }
    }

    // 4 workers x 10 enters, 4 leaves each.
    assert_eq!(expected.len(), 24);
    assert_eq!(sorted(hub.members().await), sorted(expected));
}

#[tokio::test]
async fn broadcast_reaches_exactly_the_registered_clients() {
    let (hub, _task) = Hub::spawn(HubOptions::default());

    let (early, mut early_rx) = new_client(&hub, "early");
    let (gone, mut gone_rx) = new_client(&hub, "gone");
    let (present, mut present_rx) = new_client(&hub, "present");
    let gone_id = gone.id;
    hub.enter(early);
    hub.enter(gone);
    hub.enter(present);
    hub.leave(gone_id);

    hub.broadcast("early: hi");

    let (late, mut late_rx) = new_client(&hub, "late");
    hub.enter(late);
    assert_eq!(hub.members().await.len(), 3);

    assert_eq!(next(&mut early_rx).await.as_deref(), Some("User gone is online"));
    assert_eq!(next(&mut early_rx).await.as_deref(), Some("User present is online"));
    assert_eq!(next(&mut early_rx).await.as_deref(), Some("User gone has left"));
    assert_eq!(next(&mut early_rx).await.as_deref(), Some("early: hi"));
    assert_eq!(next(&mut early_rx).await.as_deref(), Some("User late is online"));

    assert_eq!(next(&mut present_rx).await.as_deref(), Some("User gone has left"));
    assert_eq!(next(&mut present_rx).await.as_deref(), Some("early: hi"));

    // The departed client saw the newcomer, then its queue was closed.
    assert_eq!(next(&mut gone_rx).await.as_deref(), Some("User present is online"));
    assert_eq!(next(&mut gone_rx).await, None);

    hub.shutdown();
    assert_eq!(next(&mut late_rx).await.as_deref(), Some("Server is shutting down"));
    assert_eq!(next(&mut late_rx).await, None);
}

#[tokio::test]
async fn leaving_twice_notifies_once() {
    let (hub, _task) = Hub::spawn(HubOptions::default());
    let (alice, mut alice_rx) = new_client(&hub, "alice");
    let (bob, _bob_rx) = new_client(&hub, "bob");
    let bob_id = bob.id;
    hub.enter(alice);
    hub.enter(bob);

    hub.leave(bob_id);
    hub.leave(bob_id);
    hub.broadcast("alice: anyone?");

    assert_eq!(next(&mut alice_rx).await.as_deref(), Some("User bob is online"));
    assert_eq!(next(&mut alice_rx).await.as_deref(), Some("User bob has left"));
    assert_eq!(next(&mut alice_rx).await.as_deref(), Some("alice: anyone?"));
    assert_eq!(hub.members().await, vec!["alice".to_string()]);
}

#[tokio::test]
async fn same_name_clients_are_distinct() {
    let (hub, _task) = Hub::spawn(HubOptions::default());
    let (first, mut first_rx) = new_client(&hub, "sam");
    let (second, _second_rx) = new_client(&hub, "sam");
    let second_id = second.id;
    hub.enter(first);
    hub.enter(second);

    hub.leave(second_id);

    assert_eq!(hub.members().await, vec!["sam".to_string()]);
    assert_eq!(next(&mut first_rx).await.as_deref(), Some("User sam is online"));
    assert_eq!(next(&mut first_rx).await.as_deref(), Some("User sam has left"));
}
