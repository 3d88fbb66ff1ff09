use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rbit_dht::dht::{
    DhtConfig, DhtEngine, DhtError, DhtEvent, DhtMessage, DhtState, Inbound, MessageBody, Query,
    Transport,
};

/// Lossless in-memory datagram network keyed by address.
#[derive(Default)]
struct Network {
    routes: Mutex<HashMap<SocketAddr, Inbound>>,
    log: Mutex<Vec<(SocketAddr, SocketAddr, Vec<u8>)>>,
}

impl Network {
    fn queries_from(&self, from: SocketAddr, to: SocketAddr) -> Vec<Query> {
        self.log
            .lock()
            .iter()
            .filter(|(f, t, _)| *f == from && *t == to)
            .filter_map(|(_, _, data)| match DhtMessage::decode(data).ok()?.body {
                MessageBody::Query { query, .. } => Some(query),
                _ => None,
            })
            .collect()
    }
}

struct Link {
    local: SocketAddr,
    network: Arc<Network>,
}

impl Transport for Link {
    fn send_datagram(&self, data: &[u8], destination: SocketAddr) -> std::io::Result<()> {
        self.network
            .log
            .lock()
            .push((self.local, destination, data.to_vec()));
        if let Some(inbound) = self.network.routes.lock().get(&destination) {
            inbound.deliver(self.local, data);
        }
        Ok(())
    }
}

fn addr(n: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), 6881)
}

fn spawn_node(network: &Arc<Network>, n: u8, config: DhtConfig) -> DhtEngine {
    let local = addr(n);
    let link = Arc::new(Link {
        local,
        network: network.clone(),
    });
    let (engine, inbound) = DhtEngine::with_transport(config, link);
    network.routes.lock().insert(local, inbound);
    engine
}

fn isolated(n: u8) -> DhtConfig {
    DhtConfig::isolated(addr(n))
}

async fn wait_for_nodes(engine: &DhtEngine, count: usize) {
    for _ in 0..500 {
        if engine.node_count().await.unwrap() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine never reached {} nodes", count);
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<DhtEvent>) -> DhtEvent {
    tokio::time::timeout(Duration::from_secs(120), events.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_added_seed_enters_both_tables() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1, isolated(1));
    let b = spawn_node(&network, 2, isolated(2));

    a.add(vec![addr(2)]).await.unwrap();
    wait_for_nodes(&a, 1).await;
    wait_for_nodes(&b, 1).await;

    assert_eq!(a.node_count().await.unwrap(), 1);
    assert_eq!(b.node_count().await.unwrap(), 1);
    assert_eq!(a.state().await.unwrap(), DhtState::NotReady);
}

#[tokio::test(start_paused = true)]
async fn test_start_bootstraps_from_seed() {
    let network = Arc::new(Network::default());
    let _b = spawn_node(&network, 2, isolated(2));

    let mut config = isolated(1);
    config.bootstrap_nodes = vec![addr(2).to_string()];
    let a = spawn_node(&network, 1, config);
    let mut events = a.subscribe();

    a.start().await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        DhtEvent::StateChanged(DhtState::Initialising)
    );
    assert_eq!(
        next_event(&mut events).await,
        DhtEvent::StateChanged(DhtState::Ready)
    );
    assert_eq!(a.node_count().await.unwrap(), 1);
    assert!(network
        .queries_from(addr(1), addr(2))
        .iter()
        .any(|q| matches!(q, Query::FindNode { target } if *target == a.local_id())));
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_retries_until_table_has_nodes() {
    let network = Arc::new(Network::default());
    let _b = spawn_node(&network, 2, isolated(2));
    let a = spawn_node(&network, 1, isolated(1));
    let mut events = a.subscribe();

    a.start().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        DhtEvent::StateChanged(DhtState::Initialising)
    );

    a.add(vec![addr(2)]).await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        DhtEvent::StateChanged(DhtState::Ready)
    );
}

#[tokio::test(start_paused = true)]
async fn test_start_with_known_nodes_is_ready_at_once() {
    let network = Arc::new(Network::default());
    let _b = spawn_node(&network, 2, isolated(2));
    let a = spawn_node(&network, 1, isolated(1));

    a.add(vec![addr(2)]).await.unwrap();
    wait_for_nodes(&a, 1).await;

    let mut events = a.subscribe();
    a.start().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        DhtEvent::StateChanged(DhtState::Initialising)
    );
    assert_eq!(
        next_event(&mut events).await,
        DhtEvent::StateChanged(DhtState::Ready)
    );
}

#[tokio::test(start_paused = true)]
async fn test_announce_then_get_peers() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1, isolated(1));
    let _b = spawn_node(&network, 2, isolated(2));
    let c = spawn_node(&network, 3, isolated(3));
    let info_hash = [0x5a; 20];

    a.add(vec![addr(2)]).await.unwrap();
    c.add(vec![addr(2)]).await.unwrap();
    wait_for_nodes(&a, 1).await;
    wait_for_nodes(&c, 1).await;

    let before = a.announce(info_hash).await.unwrap();
    assert!(before.is_empty());
    assert!(network
        .queries_from(addr(1), addr(2))
        .iter()
        .any(|q| matches!(q, Query::AnnouncePeer { implied_port: true, .. })));

    let mut events = c.subscribe();
    let peers = c.get_peers(info_hash).await.unwrap();
    assert_eq!(peers, vec![addr(1)]);
    assert_eq!(
        next_event(&mut events).await,
        DhtEvent::PeersFound {
            info_hash,
            peers: vec![addr(1)],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_bucket_is_refreshed() {
    let network = Arc::new(Network::default());
    let _b = spawn_node(&network, 2, isolated(2));

    let mut config = isolated(1);
    config.bucket_refresh_timeout = Duration::from_secs(60);
    let a = spawn_node(&network, 1, config);

    a.add(vec![addr(2)]).await.unwrap();
    wait_for_nodes(&a, 1).await;
    a.start().await.unwrap();

    let refreshes = || {
        network
            .queries_from(addr(1), addr(2))
            .into_iter()
            .filter(|q| matches!(q, Query::FindNode { .. }))
            .count()
    };
    assert_eq!(refreshes(), 0);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(refreshes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_save_and_load_through_file() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1, isolated(1));
    let b = spawn_node(&network, 2, isolated(2));

    a.add(vec![addr(2)]).await.unwrap();
    wait_for_nodes(&a, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dht.dat");
    a.save_to_file(&path).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap().len(), 26);

    let d = spawn_node(&network, 4, isolated(4));
    assert_eq!(d.load_from_file(&path).await.unwrap(), 1);
    assert_eq!(d.node_count().await.unwrap(), 1);

    let saved = d.save_nodes().await.unwrap();
    assert_eq!(&saved[..20], b.local_id().as_bytes());
}

#[tokio::test(start_paused = true)]
async fn test_load_rejects_partial_record() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1, isolated(1));

    let err = a.load_nodes(&[0u8; 25]).await.unwrap_err();
    assert!(matches!(err, DhtError::InvalidNodeData(25)));
    assert_eq!(a.node_count().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_load_missing_file_is_io_error() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1, isolated(1));
    let dir = tempfile::tempdir().unwrap();

    let err = a.load_from_file(dir.path().join("absent")).await.unwrap_err();
    assert!(matches!(err, DhtError::Io(_)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_rejects_further_calls() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1, isolated(1));

    a.stop().await.unwrap();
    assert!(matches!(a.node_count().await, Err(DhtError::EngineStopped)));
    a.stop().await.unwrap();
}
