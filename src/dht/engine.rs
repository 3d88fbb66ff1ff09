use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::bucket::BUCKET_SIZE;
use super::config::DhtConfig;
use super::error::DhtError;
use super::handler::LocalNode;
use super::id::NodeId;
use super::lookup::{self, LookupKind};
use super::message::Query;
use super::message_loop::{MessageLoop, QueryCompleted, QueryOutcome};
use super::node::{Node, COMPACT_NODE_LEN};
use super::peer_store::PeerStore;
use super::routing::RoutingTable;
use super::token::TokenManager;
use super::transport::{read_socket, Inbound, Transport};

const COMMAND_QUEUE_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;

/// Readiness of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtState {
    NotReady,
    Initialising,
    Ready,
}

/// Notifications for the layer above the DHT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtEvent {
    StateChanged(DhtState),
    PeersFound {
        info_hash: [u8; 20],
        peers: Vec<SocketAddr>,
    },
}

enum Command {
    Start,
    SetState(DhtState),
    State(oneshot::Sender<DhtState>),
    Add(Vec<SocketAddr>),
    Query {
        destination: SocketAddr,
        node_id: Option<NodeId>,
        query: Query,
        reply: oneshot::Sender<QueryCompleted>,
    },
    Closest(NodeId, usize, oneshot::Sender<Vec<Node>>),
    NodeCount(oneshot::Sender<usize>),
    SaveNodes(oneshot::Sender<Bytes>),
    LoadNodes(Vec<Node>, oneshot::Sender<usize>),
    Stop(oneshot::Sender<()>),
}

/// Cheap handle onto the engine task, used by lookups and bootstrap.
#[derive(Clone)]
pub(crate) struct Handle {
    commands: mpsc::Sender<Command>,
    local_id: NodeId,
}

impl Handle {
    pub(crate) fn local_id(&self) -> NodeId {
        self.local_id
    }

    async fn send(&self, command: Command) -> Result<(), DhtError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DhtError::EngineStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, DhtError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| DhtError::EngineStopped)
    }

    pub(crate) async fn query(
        &self,
        destination: SocketAddr,
        node_id: Option<NodeId>,
        query: Query,
    ) -> Result<QueryCompleted, DhtError> {
        self.request(|reply| Command::Query {
            destination,
            node_id,
            query,
            reply,
        })
        .await
    }

    pub(crate) async fn closest(&self, target: NodeId, count: usize) -> Result<Vec<Node>, DhtError> {
        self.request(|reply| Command::Closest(target, count, reply))
            .await
    }

    async fn node_count(&self) -> Result<usize, DhtError> {
        self.request(Command::NodeCount).await
    }
}

/// BitTorrent DHT node ([BEP-5]).
///
/// All routing state lives on one background task; `DhtEngine` is a
/// cloneable handle that talks to it over a channel.
///
/// # Examples
///
/// ```no_run
/// use rbit_dht::dht::{DhtConfig, DhtEngine};
///
/// # async fn example() -> Result<(), rbit_dht::dht::DhtError> {
/// let dht = DhtEngine::bind(DhtConfig::default()).await?;
/// dht.start().await?;
///
/// let info_hash = [0u8; 20];
/// let peers = dht.get_peers(info_hash).await?;
/// # Ok(())
/// # }
/// ```
///
/// [BEP-5]: http://bittorrent.org/beps/bep_0005.html
#[derive(Clone)]
pub struct DhtEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    handle: Handle,
    config: DhtConfig,
    events: broadcast::Sender<DhtEvent>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    local_addr: Option<SocketAddr>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl DhtEngine {
    /// Binds a UDP socket at `config.bind_addr` and spawns the engine.
    pub async fn bind(config: DhtConfig) -> Result<Self, DhtError> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let local_addr = socket.local_addr()?;

        let (engine, inbound) =
            Self::spawn(config, socket.clone() as Arc<dyn Transport>, Some(local_addr));
        let reader = tokio::spawn(read_socket(socket, inbound));
        engine.tasks().lock().push(reader);

        info!("DHT bound to {} with id {}", local_addr, engine.local_id());
        Ok(engine)
    }

    /// Spawns the engine over a caller-provided transport.
    ///
    /// Datagrams received for this node must be passed to the returned
    /// [`Inbound`]. Must be called from within a Tokio runtime.
    pub fn with_transport(config: DhtConfig, transport: Arc<dyn Transport>) -> (Self, Inbound) {
        Self::spawn(config, transport, None)
    }

    fn spawn(
        config: DhtConfig,
        transport: Arc<dyn Transport>,
        local_addr: Option<SocketAddr>,
    ) -> (Self, Inbound) {
        let local_id = config.node_id.unwrap_or_else(NodeId::random);
        let (inbound, inbound_rx) = Inbound::channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tasks = Arc::new(Mutex::new(Vec::new()));

        let handle = Handle {
            commands: command_tx,
            local_id,
        };

        let local = LocalNode::new(
            RoutingTable::new(local_id),
            TokenManager::new(),
            PeerStore::new(config.peer_announce_lifetime, config.max_peers_per_torrent),
        );
        let rpc = MessageLoop::new(
            transport,
            inbound_rx,
            config.query_timeout,
            config.max_in_flight,
            config.min_send_interval,
        );

        let actor = EngineActor {
            local,
            rpc,
            commands: command_rx,
            events: events.clone(),
            state: DhtState::NotReady,
            started: false,
            config: config.clone(),
            handle: handle.clone(),
            tasks: tasks.clone(),
        };
        tasks.lock().push(tokio::spawn(actor.run()));

        let engine = Self {
            inner: Arc::new(EngineInner {
                handle,
                config,
                events,
                tasks,
                local_addr,
            }),
        };
        (engine, inbound)
    }

    fn tasks(&self) -> &Mutex<Vec<JoinHandle<()>>> {
        &self.inner.tasks
    }

    pub fn local_id(&self) -> NodeId {
        self.inner.handle.local_id
    }

    /// The bound UDP address, for engines created with [`DhtEngine::bind`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn config(&self) -> &DhtConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DhtEvent> {
        self.inner.events.subscribe()
    }

    /// Bootstraps if the routing table is empty, then turns ready and
    /// starts refreshing stale buckets.
    pub async fn start(&self) -> Result<(), DhtError> {
        self.inner.handle.send(Command::Start).await
    }

    /// Stops the engine, discarding queued and in-flight queries.
    pub async fn stop(&self) -> Result<(), DhtError> {
        let stopped = self.inner.handle.request(Command::Stop).await;
        for task in self.tasks().lock().drain(..) {
            task.abort();
        }

        match stopped {
            Ok(()) | Err(DhtError::EngineStopped) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn state(&self) -> Result<DhtState, DhtError> {
        self.inner.handle.request(Command::State).await
    }

    /// Pings each address; those that answer enter the routing table.
    pub async fn add(&self, nodes: Vec<SocketAddr>) -> Result<(), DhtError> {
        self.inner.handle.send(Command::Add(nodes)).await
    }

    pub async fn node_count(&self) -> Result<usize, DhtError> {
        self.inner.handle.node_count().await
    }

    /// Iterative `find_node` walk; returns the closest nodes that answered.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<Node>, DhtError> {
        let found = lookup::run(&self.inner.handle, target, LookupKind::FindNode, &self.inner.config).await?;
        Ok(found.responders.into_iter().map(|r| r.node).collect())
    }

    pub async fn get_peers(&self, info_hash: [u8; 20]) -> Result<Vec<SocketAddr>, DhtError> {
        let found = lookup::run(
            &self.inner.handle,
            NodeId::from(info_hash),
            LookupKind::GetPeers,
            &self.inner.config,
        )
        .await?;

        info!(
            "DHT get_peers found {} peers from {} nodes",
            found.peers.len(),
            found.responders.len()
        );
        Ok(found.peers)
    }

    /// Looks up peers for `info_hash`, then announces ourselves to the
    /// closest nodes that handed us a write token.
    pub async fn announce(&self, info_hash: [u8; 20]) -> Result<Vec<SocketAddr>, DhtError> {
        let config = &self.inner.config;
        let handle = &self.inner.handle;

        let found = lookup::run(handle, NodeId::from(info_hash), LookupKind::GetPeers, config).await?;

        let port = config
            .announce_port
            .or_else(|| self.local_addr().map(|a| a.port()))
            .unwrap_or(0);
        let implied_port = config.announce_port.is_none();

        let announces = found
            .responders
            .iter()
            .filter_map(|r| r.token.clone().map(|token| (&r.node, token)))
            .take(BUCKET_SIZE)
            .map(|(node, token)| {
                handle.query(
                    node.addr,
                    Some(node.id),
                    Query::AnnouncePeer {
                        info_hash,
                        port,
                        token,
                        implied_port,
                    },
                )
            });

        let mut accepted = 0;
        for result in futures::future::join_all(announces).await {
            if matches!(result?.outcome, QueryOutcome::Response(_)) {
                accepted += 1;
            }
        }

        info!(
            "announced {:02x?} to {} nodes, {} peers known",
            &info_hash[..4],
            accepted,
            found.peers.len()
        );
        Ok(found.peers)
    }

    /// Compact records (26 bytes each) of the non-bad nodes and bucket
    /// replacements.
    pub async fn save_nodes(&self) -> Result<Bytes, DhtError> {
        self.inner.handle.request(Command::SaveNodes).await
    }

    /// Loads records produced by [`DhtEngine::save_nodes`]. Returns how many
    /// nodes entered a bucket.
    pub async fn load_nodes(&self, data: &[u8]) -> Result<usize, DhtError> {
        if data.len() % COMPACT_NODE_LEN != 0 {
            return Err(DhtError::InvalidNodeData(data.len()));
        }

        let nodes: Vec<Node> = data
            .chunks_exact(COMPACT_NODE_LEN)
            .filter_map(Node::from_compact)
            .collect();
        self.inner
            .handle
            .request(|reply| Command::LoadNodes(nodes, reply))
            .await
    }

    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), DhtError> {
        let data = self.save_nodes().await?;
        tokio::fs::write(path, &data).await?;
        Ok(())
    }

    pub async fn load_from_file(&self, path: impl AsRef<Path>) -> Result<usize, DhtError> {
        let data = tokio::fs::read(path).await?;
        self.load_nodes(&data).await
    }
}

struct EngineActor {
    local: LocalNode,
    rpc: MessageLoop,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<DhtEvent>,
    state: DhtState,
    started: bool,
    config: DhtConfig,
    handle: Handle,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EngineActor {
    async fn run(mut self) {
        let mut tick = interval(self.config.tick_interval);
        let mut refresh = interval(self.config.refresh_check_interval);
        let rotation_period = self.config.token_rotation_interval;
        let mut rotation = interval_at(Instant::now() + rotation_period, rotation_period);

        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        rotation.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.rpc.shutdown();
                        break;
                    }
                },
                _ = tick.tick() => {
                    self.rpc.tick(&mut self.local, &self.events);
                }
                _ = refresh.tick(), if self.started => {
                    self.refresh_stale_buckets();
                }
                _ = rotation.tick() => {
                    self.local.tokens.refresh_tokens();
                    self.local.peers.expire();
                }
            }
        }

        debug!("DHT engine stopped");
    }

    /// Returns false once the engine should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start => self.start(),
            Command::SetState(state) => self.set_state(state),
            Command::State(reply) => {
                let _ = reply.send(self.state);
            }
            Command::Add(addrs) => {
                for addr in addrs {
                    self.rpc.enqueue_query(addr, None, Query::Ping);
                }
            }
            Command::Query {
                destination,
                node_id,
                query,
                reply,
            } => {
                self.rpc.query_with_reply(destination, node_id, query, reply);
            }
            Command::Closest(target, count, reply) => {
                let _ = reply.send(self.local.table.closest(&target, count));
            }
            Command::NodeCount(reply) => {
                let _ = reply.send(self.local.table.count_nodes());
            }
            Command::SaveNodes(reply) => {
                let _ = reply.send(Bytes::from(self.local.save_nodes()));
            }
            Command::LoadNodes(nodes, reply) => {
                let added = self.local.load_nodes(nodes);
                debug!("loaded {} DHT nodes", added);
                let _ = reply.send(added);
            }
            Command::Stop(ack) => {
                self.rpc.shutdown();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.set_state(DhtState::Initialising);

        if self.local.table.needs_bootstrap() {
            let task = tokio::spawn(bootstrap(self.handle.clone(), self.config.clone()));
            self.tasks.lock().push(task);
        } else {
            self.set_state(DhtState::Ready);
        }
    }

    fn set_state(&mut self, state: DhtState) {
        if self.state == state {
            return;
        }
        info!("DHT state {:?} -> {:?}", self.state, state);
        self.state = state;
        // No subscribers is fine.
        let _ = self.events.send(DhtEvent::StateChanged(state));
    }

    /// Sends a `find_node` for a random id into every bucket idle longer
    /// than the refresh timeout, via its least recently seen node.
    fn refresh_stale_buckets(&mut self) {
        let timeout = self.config.bucket_refresh_timeout;
        let mut targets = Vec::new();

        for bucket in self.local.table.buckets_mut() {
            if bucket.last_changed().elapsed() < timeout {
                continue;
            }
            bucket.sort_by_last_seen();
            let target = bucket.random_id();
            let via = bucket.nodes().first().map(|n| (n.addr, n.id));
            bucket.changed();
            targets.push((target, via));
        }

        for (target, via) in targets {
            let via = via.or_else(|| {
                self.local
                    .table
                    .closest(&target, 1)
                    .first()
                    .map(|n| (n.addr, n.id))
            });
            match via {
                Some((addr, id)) => {
                    trace!("refreshing bucket around {} via {}", target, addr);
                    self.rpc.enqueue_query(addr, Some(id), Query::FindNode { target });
                }
                None => trace!("no node to refresh bucket around {}", target),
            }
        }
    }
}

/// Finds our neighbourhood from the configured seeds, retrying until the
/// table holds at least one node.
async fn bootstrap(handle: Handle, config: DhtConfig) {
    let local_id = handle.local_id();

    loop {
        let seeds = resolve_seeds(&config.bootstrap_nodes).await;
        info!("bootstrapping DHT from {} seed addresses", seeds.len());

        let queries = seeds
            .into_iter()
            .map(|addr| handle.query(addr, None, Query::FindNode { target: local_id }));
        for result in futures::future::join_all(queries).await {
            if let Err(DhtError::EngineStopped) = result {
                return;
            }
        }

        match lookup::run(&handle, local_id, LookupKind::FindNode, &config).await {
            Ok(found) => debug!("bootstrap walk reached {} nodes", found.responders.len()),
            Err(_) => return,
        }

        match handle.node_count().await {
            Ok(0) => {
                warn!(
                    "DHT bootstrap found no nodes, retrying in {:?}",
                    config.bootstrap_retry_interval
                );
                tokio::time::sleep(config.bootstrap_retry_interval).await;
            }
            Ok(count) => {
                info!("DHT bootstrap complete, {} nodes in routing table", count);
                let _ = handle.send(Command::SetState(DhtState::Ready)).await;
                return;
            }
            Err(_) => return,
        }
    }
}

async fn resolve_seeds(hosts: &[String]) -> Vec<SocketAddr> {
    let mut seeds = Vec::new();
    for host in hosts {
        match tokio::net::lookup_host(host.as_str()).await {
            Ok(addrs) => seeds.extend(addrs.filter(SocketAddr::is_ipv4)),
            Err(e) => warn!("Failed to resolve bootstrap node {}: {}", host, e),
        }
    }
    seeds
}
