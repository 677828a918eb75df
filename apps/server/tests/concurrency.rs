use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use relaychat_client::config::ClientConfig;
use relaychat_client::prompt::AutoEcho;
use relaychat_client::{ClientSession, Handshake};
use relaychat_server::config::ServerConfig;
use relaychat_server::server::RelayServer;
use relaychat_server::state::RelayState;
use relaychat_shared::ids::Uid;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

const WAIT: Duration = Duration::from_secs(10);

async fn start_relay() -> (SocketAddr, RelayState, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let state = RelayState::new(ServerConfig::default(), relaychat_crypto::generate_asymmetric_keypair());
    let server = RelayServer::from_listener(listener, state.clone());
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));
    (addr, state, stop)
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        ..Default::default()
    }
}

async fn try_register(addr: SocketAddr, uid: Uid) -> Option<ClientSession> {
    let mut session = ClientSession::connect(&config_for(addr), Handshake::generate(uid), Arc::new(AutoEcho))
        .await
        .ok()?;
    match tokio::time::timeout(Duration::from_secs(2), session.wait_registered()).await {
        Ok(Ok(())) => Some(session),
        _ => None,
    }
}

/// `n` distinct phone-number style uids drawn at random.
fn random_uids(n: usize) -> Vec<Uid> {
    let mut rng = rand::rng();
    let mut seen = HashSet::new();
    while seen.len() < n {
        seen.insert(format!("+1{:010}", rng.random_range(0..10_000_000_000u64)));
    }
    seen.iter().map(|raw| Uid::parse(raw).unwrap()).collect()
}

async fn settle(state: &RelayState, uids: &[Uid]) {
    tokio::time::timeout(WAIT, async {
        while !uids.iter().all(|uid| state.store.is_registered(uid)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registrations did not settle");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_of_distinct_uids_all_complete() {
    const N: usize = 32;
    let (addr, state, _stop) = start_relay().await;

    let uids = random_uids(N);

    let mut tasks = JoinSet::new();
    for uid in &uids {
        tasks.spawn(try_register(addr, uid.clone()));
    }
    let mut sessions = Vec::new();
    while let Some(result) = tasks.join_next().await {
        sessions.push(result.unwrap().expect("registration failed"));
    }
    settle(&state, &uids).await;

    assert_eq!(state.store.user_keys.len(), N);
    assert_eq!(state.store.registrations.len(), N);
    for uid in &uids {
        let keys = state.store.user_keys.find_by_uid(uid).unwrap();
        let row = state.store.registrations.find_by_uid(uid).unwrap();
        assert_eq!(&keys.uid, uid);
        assert_eq!(&row.uid, uid);
        assert!(keys.wrapped_symmetric_key.is_some());
        assert!(row.is_complete());
    }

    // Every wrapped key is distinct: no session's material leaked into another row.
    let mut wrapped: Vec<String> = uids
        .iter()
        .map(|uid| state.store.user_keys.find_by_uid(uid).unwrap().wrapped_symmetric_key.unwrap())
        .collect();
    wrapped.sort();
    wrapped.dedup();
    assert_eq!(wrapped.len(), N);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_of_one_uid_complete_once() {
    const N: usize = 8;
    let (addr, state, _stop) = start_relay().await;

    let mut tasks = JoinSet::new();
    for _ in 0..N {
        tasks.spawn(try_register(addr, Uid::parse("555").unwrap()));
    }
    let mut winners = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Some(session) = result.unwrap() {
            winners.push(session);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(state.store.user_keys.len(), 1);
    assert_eq!(state.store.registrations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_reach_one_recipient() {
    const SENDERS: usize = 8;
    let (addr, state, _stop) = start_relay().await;

    let uids = random_uids(SENDERS + 1);
    let (recipient_uid, sender_uids) = uids.split_first().unwrap();

    let mut recipient = try_register(addr, recipient_uid.clone())
        .await
        .expect("recipient registration failed");
    let mut senders = Vec::new();
    for uid in sender_uids {
        senders.push(try_register(addr, uid.clone()).await.expect("sender registration failed"));
    }
    settle(&state, &uids).await;

    let mut tasks = JoinSet::new();
    for sender in senders {
        let destination = recipient_uid.clone();
        tasks.spawn(async move {
            let text = format!("hello from {}", sender.uid());
            sender.send_message(destination, &text).await.unwrap();
            sender
        });
    }
    let mut senders = Vec::new();
    while let Some(result) = tasks.join_next().await {
        senders.push(result.unwrap());
    }

    let mut received = Vec::new();
    for _ in 0..SENDERS {
        let message = tokio::time::timeout(WAIT, recipient.next_message())
            .await
            .expect("message not relayed")
            .unwrap();
        assert_eq!(message.text, format!("hello from {}", message.from));
        received.push(message.from);
    }
    received.sort();
    received.dedup();
    assert_eq!(received.len(), SENDERS);
}
