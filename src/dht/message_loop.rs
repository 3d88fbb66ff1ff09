use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::engine::DhtEvent;
use super::handler::LocalNode;
use super::id::NodeId;
use super::message::{DhtMessage, KrpcError, MessageBody, Query, Response, TransactionId};
use super::transport::{InboundMessage, Transport};

/// How a query we sent ended.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Response(Response),
    Error(KrpcError),
    /// No answer within the query timeout, or the datagram could not be sent.
    Timeout,
}

impl QueryOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            QueryOutcome::Response(r) => Some(r),
            _ => None,
        }
    }
}

/// Notification raised once per query, whatever its outcome.
#[derive(Debug, Clone)]
pub struct QueryCompleted {
    pub destination: SocketAddr,
    /// Id of the queried node, when we knew it before asking.
    pub node_id: Option<NodeId>,
    pub query: Query,
    pub outcome: QueryOutcome,
}

enum Outgoing {
    Query {
        destination: SocketAddr,
        node_id: Option<NodeId>,
        query: Query,
        reply: Option<oneshot::Sender<QueryCompleted>>,
    },
    Reply {
        destination: SocketAddr,
        message: DhtMessage,
    },
}

struct PendingQuery {
    transaction_id: TransactionId,
    destination: SocketAddr,
    node_id: Option<NodeId>,
    query: Query,
    sent_at: Instant,
    reply: Option<oneshot::Sender<QueryCompleted>>,
}

/// Serialised RPC engine.
///
/// Each [`MessageLoop::tick`] runs at most one send, one receive and one
/// timeout check, in that order. Queries leave in FIFO order and time out
/// in send order.
pub struct MessageLoop {
    transport: Arc<dyn Transport>,
    inbound: mpsc::Receiver<InboundMessage>,
    send_queue: VecDeque<Outgoing>,
    pending: VecDeque<PendingQuery>,
    last_sent: Option<Instant>,
    next_transaction: u16,
    query_timeout: Duration,
    max_in_flight: usize,
    min_send_interval: Duration,
}

impl MessageLoop {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<InboundMessage>,
        query_timeout: Duration,
        max_in_flight: usize,
        min_send_interval: Duration,
    ) -> Self {
        Self {
            transport,
            inbound,
            send_queue: VecDeque::new(),
            pending: VecDeque::new(),
            last_sent: None,
            next_transaction: rand::random(),
            query_timeout,
            max_in_flight,
            min_send_interval,
        }
    }

    /// Queues a query whose completion only feeds the routing table.
    pub fn enqueue_query(&mut self, destination: SocketAddr, node_id: Option<NodeId>, query: Query) {
        self.send_queue.push_back(Outgoing::Query {
            destination,
            node_id,
            query,
            reply: None,
        });
    }

    /// Queues a query and returns a receiver for its completion.
    pub fn send_query(
        &mut self,
        destination: SocketAddr,
        node_id: Option<NodeId>,
        query: Query,
    ) -> oneshot::Receiver<QueryCompleted> {
        let (tx, rx) = oneshot::channel();
        self.query_with_reply(destination, node_id, query, tx);
        rx
    }

    pub(crate) fn query_with_reply(
        &mut self,
        destination: SocketAddr,
        node_id: Option<NodeId>,
        query: Query,
        reply: oneshot::Sender<QueryCompleted>,
    ) {
        self.send_queue.push_back(Outgoing::Query {
            destination,
            node_id,
            query,
            reply: Some(reply),
        });
    }

    pub fn queued_count(&self) -> usize {
        self.send_queue.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, transaction_id: &[u8]) -> bool {
        self.pending
            .iter()
            .any(|p| p.transaction_id.as_ref() == transaction_id)
    }

    pub fn tick(&mut self, local: &mut LocalNode, events: &broadcast::Sender<DhtEvent>) {
        self.send_phase(local, events);
        self.receive_phase(local, events);
        self.timeout_phase(local, events);
    }

    fn send_phase(&mut self, local: &mut LocalNode, events: &broadcast::Sender<DhtEvent>) {
        let Some(front) = self.send_queue.front() else {
            return;
        };

        // Replies never wait on the in-flight cap, only on spacing.
        if matches!(front, Outgoing::Query { .. }) && self.pending.len() >= self.max_in_flight {
            return;
        }

        let now = Instant::now();
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.min_send_interval {
                return;
            }
        }

        let Some(outgoing) = self.send_queue.pop_front() else {
            return;
        };
        self.last_sent = Some(now);

        match outgoing {
            Outgoing::Reply {
                destination,
                message,
            } => {
                if let Err(e) = self.transport.send_datagram(&message.encode(), destination) {
                    debug!("failed to send reply to {}: {}", destination, e);
                }
            }
            Outgoing::Query {
                destination,
                node_id,
                query,
                reply,
            } => {
                let transaction_id = self.next_transaction_id();
                let message = DhtMessage::query(transaction_id.clone(), local.id(), query.clone());

                let pending = PendingQuery {
                    transaction_id,
                    destination,
                    node_id,
                    query,
                    sent_at: now,
                    reply,
                };

                match self.transport.send_datagram(&message.encode(), destination) {
                    Ok(()) => {
                        trace!("sent {} to {}", pending.query.method(), destination);
                        self.pending.push_back(pending);
                    }
                    Err(e) => {
                        warn!(
                            "failed to send {} to {}: {}",
                            pending.query.method(),
                            destination,
                            e
                        );
                        self.complete(local, events, pending, QueryOutcome::Timeout);
                    }
                }
            }
        }
    }

    fn receive_phase(&mut self, local: &mut LocalNode, events: &broadcast::Sender<DhtEvent>) {
        let (source, message) = match self.inbound.try_recv() {
            Ok(inbound) => inbound,
            Err(_) => return,
        };

        let transaction_id = message.transaction_id;
        match message.body {
            MessageBody::Query { sender, query } => {
                local.observe(sender, source);
                trace!("{} query from {}", query.method(), source);

                let message = match local.handle_query(source, query) {
                    Ok(response) => DhtMessage::response(transaction_id, response),
                    Err(error) => DhtMessage::error(transaction_id, error),
                };
                self.send_queue.push_back(Outgoing::Reply {
                    destination: source,
                    message,
                });
            }
            MessageBody::Response(response) => {
                let Some(pending) = self.take_pending(&transaction_id, source) else {
                    trace!("dropping response from {} with unknown transaction", source);
                    return;
                };

                local.observe(response.id, source);
                self.complete(local, events, pending, QueryOutcome::Response(response));
            }
            MessageBody::Error(error) => {
                let Some(pending) = self.take_pending(&transaction_id, source) else {
                    trace!("dropping error from {} with unknown transaction", source);
                    return;
                };

                if let Some(id) = pending.node_id {
                    local.table.node_seen(&id);
                }
                self.complete(local, events, pending, QueryOutcome::Error(error));
            }
        }
    }

    fn timeout_phase(&mut self, local: &mut LocalNode, events: &broadcast::Sender<DhtEvent>) {
        let expired = self
            .pending
            .front()
            .is_some_and(|p| p.sent_at.elapsed() >= self.query_timeout);
        if !expired {
            return;
        }

        if let Some(pending) = self.pending.pop_front() {
            trace!(
                "{} to {} timed out",
                pending.query.method(),
                pending.destination
            );
            self.complete(local, events, pending, QueryOutcome::Timeout);
        }
    }

    fn take_pending(&mut self, transaction_id: &Bytes, source: SocketAddr) -> Option<PendingQuery> {
        let pos = self
            .pending
            .iter()
            .position(|p| &p.transaction_id == transaction_id && p.destination == source)?;
        self.pending.remove(pos)
    }

    fn complete(
        &mut self,
        local: &mut LocalNode,
        events: &broadcast::Sender<DhtEvent>,
        pending: PendingQuery,
        outcome: QueryOutcome,
    ) {
        let completed = QueryCompleted {
            destination: pending.destination,
            node_id: pending.node_id,
            query: pending.query,
            outcome,
        };

        for contact in local.query_completed(&completed, events) {
            self.enqueue_query(contact.addr, Some(contact.id), Query::Ping);
        }

        if let Some(reply) = pending.reply {
            // The waiter may have given up.
            let _ = reply.send(completed);
        }
    }

    /// Two-byte transaction ids, skipping any still in flight.
    fn next_transaction_id(&mut self) -> TransactionId {
        loop {
            let id = self.next_transaction.to_be_bytes();
            self.next_transaction = self.next_transaction.wrapping_add(1);
            if !self.is_pending(&id) {
                return Bytes::copy_from_slice(&id);
            }
        }
    }

    /// Drops queued and in-flight work. Waiters see their reply channel
    /// close.
    pub fn shutdown(&mut self) {
        let dropped = self.send_queue.len() + self.pending.len();
        if dropped > 0 {
            debug!("discarding {} queued and pending DHT messages", dropped);
        }
        self.send_queue.clear();
        self.pending.clear();
        self.inbound.close();
    }
}
