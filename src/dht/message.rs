use super::error::DhtError;
use super::id::{NodeId, ID_LEN};
use super::node::{compact_addr, compact_addr_from_bytes, Node, COMPACT_NODE_LEN};
use crate::bencode::{decode_bytes, encode, Value};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;

pub type TransactionId = Bytes;

/// KRPC error codes (BEP-5).
pub mod error_code {
    pub const GENERIC: i64 = 201;
    pub const SERVER: i64 = 202;
    pub const PROTOCOL: i64 = 203;
    pub const METHOD_UNKNOWN: i64 = 204;
}

/// The `e` payload of a KRPC error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KrpcError {
    pub code: i64,
    pub message: String,
}

impl KrpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(error_code::GENERIC, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(error_code::PROTOCOL, message)
    }

    pub fn method_unknown(method: &str) -> Self {
        Self::new(error_code::METHOD_UNKNOWN, format!("method unknown: {}", method))
    }
}

impl fmt::Display for KrpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

impl From<DhtError> for KrpcError {
    fn from(err: DhtError) -> Self {
        match err {
            DhtError::InvalidToken => KrpcError::protocol("invalid token"),
            DhtError::InvalidMessage(msg) => KrpcError::protocol(msg),
            other => KrpcError::generic(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Ping,
    FindNode {
        target: NodeId,
    },
    GetPeers {
        info_hash: [u8; 20],
    },
    AnnouncePeer {
        info_hash: [u8; 20],
        port: u16,
        token: Bytes,
        implied_port: bool,
    },
    /// A well-formed query for a method we do not implement.
    Unknown(String),
}

impl Query {
    pub fn method(&self) -> &str {
        match self {
            Query::Ping => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
            Query::Unknown(method) => method.as_str(),
        }
    }
}

/// The `r` payload of a KRPC response.
///
/// Responses do not say which query they answer; the fields present depend
/// on the query, which the caller knows from the transaction id.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: NodeId,
    pub nodes: Vec<Node>,
    pub values: Vec<SocketAddr>,
    pub token: Option<Bytes>,
}

impl Response {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            values: Vec::new(),
            token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MessageBody {
    Query { sender: NodeId, query: Query },
    Response(Response),
    Error(KrpcError),
}

/// A decoded KRPC message.
#[derive(Debug, Clone)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    pub body: MessageBody,
}

impl DhtMessage {
    pub fn query(transaction_id: TransactionId, sender: NodeId, query: Query) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Query { sender, query },
        }
    }

    pub fn response(transaction_id: TransactionId, response: Response) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Response(response),
        }
    }

    pub fn error(transaction_id: TransactionId, error: KrpcError) -> Self {
        Self {
            transaction_id,
            body: MessageBody::Error(error),
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self.body, MessageBody::Query { .. })
    }

    pub fn decode(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode_bytes(Bytes::copy_from_slice(data))?;

        if value.as_dict().is_none() {
            return Err(invalid("expected dict"));
        }

        let transaction_id = value
            .get_bytes(b"t")
            .cloned()
            .ok_or_else(|| invalid("missing transaction id"))?;

        let body = match value.get_str(b"y") {
            Some("q") => decode_query(&value)?,
            Some("r") => decode_response(&value)?,
            Some("e") => decode_error(&value)?,
            Some(other) => return Err(invalid(format!("unknown message type: {}", other))),
            None => return Err(invalid("missing message type")),
        };

        Ok(Self {
            transaction_id,
            body,
        })
    }

    pub fn encode(&self) -> Bytes {
        let t = Value::Bytes(self.transaction_id.clone());

        let value = match &self.body {
            MessageBody::Query { sender, query } => {
                let mut args = vec![(&b"id"[..], id_value(sender))];
                match query {
                    Query::Ping | Query::Unknown(_) => {}
                    Query::FindNode { target } => {
                        args.push((&b"target"[..], id_value(target)));
                    }
                    Query::GetPeers { info_hash } => {
                        args.push((&b"info_hash"[..], Value::bytes(info_hash.to_vec())));
                    }
                    Query::AnnouncePeer {
                        info_hash,
                        port,
                        token,
                        implied_port,
                    } => {
                        args.push((&b"info_hash"[..], Value::bytes(info_hash.to_vec())));
                        args.push((&b"port"[..], Value::Int(i64::from(*port))));
                        args.push((&b"token"[..], Value::Bytes(token.clone())));
                        if *implied_port {
                            args.push((&b"implied_port"[..], Value::Int(1)));
                        }
                    }
                }

                Value::dict([
                    (&b"a"[..], Value::dict(args)),
                    (&b"q"[..], Value::str(query.method())),
                    (&b"t"[..], t),
                    (&b"y"[..], Value::str("q")),
                ])
            }
            MessageBody::Response(response) => {
                let mut r = vec![(&b"id"[..], id_value(&response.id))];
                if !response.nodes.is_empty() {
                    let mut compact = BytesMut::with_capacity(response.nodes.len() * COMPACT_NODE_LEN);
                    for node in response.nodes.iter().filter_map(Node::to_compact) {
                        compact.extend_from_slice(&node);
                    }
                    r.push((&b"nodes"[..], Value::Bytes(compact.freeze())));
                }
                if let Some(token) = &response.token {
                    r.push((&b"token"[..], Value::Bytes(token.clone())));
                }
                if !response.values.is_empty() {
                    let values = response
                        .values
                        .iter()
                        .filter_map(compact_addr)
                        .map(|peer| Value::bytes(peer.to_vec()))
                        .collect();
                    r.push((&b"values"[..], Value::List(values)));
                }

                Value::dict([
                    (&b"r"[..], Value::dict(r)),
                    (&b"t"[..], t),
                    (&b"y"[..], Value::str("r")),
                ])
            }
            MessageBody::Error(error) => Value::dict([
                (
                    &b"e"[..],
                    Value::List(vec![Value::Int(error.code), Value::str(&error.message)]),
                ),
                (&b"t"[..], t),
                (&b"y"[..], Value::str("e")),
            ]),
        };

        encode(&value)
    }
}

fn invalid(msg: impl Into<String>) -> DhtError {
    DhtError::InvalidMessage(msg.into())
}

fn id_value(id: &NodeId) -> Value {
    Value::bytes(id.as_bytes().to_vec())
}

fn hash_arg(args: &Value, key: &[u8]) -> Result<[u8; ID_LEN], DhtError> {
    args.get_bytes(key)
        .and_then(|b| <[u8; ID_LEN]>::try_from(b.as_ref()).ok())
        .ok_or_else(|| invalid(format!("missing {}", String::from_utf8_lossy(key))))
}

fn decode_query(value: &Value) -> Result<MessageBody, DhtError> {
    let method = value
        .get_str(b"q")
        .ok_or_else(|| invalid("missing query name"))?;

    let args = value
        .get(b"a")
        .filter(|a| a.as_dict().is_some())
        .ok_or_else(|| invalid("missing query args"))?;

    let sender = NodeId::from(hash_arg(args, b"id")?);

    let query = match method {
        "ping" => Query::Ping,
        "find_node" => Query::FindNode {
            target: NodeId::from(hash_arg(args, b"target")?),
        },
        "get_peers" => Query::GetPeers {
            info_hash: hash_arg(args, b"info_hash")?,
        },
        "announce_peer" => {
            let implied_port = args.get_int(b"implied_port") == Some(1);
            let port = match args.get_int(b"port") {
                Some(p) => u16::try_from(p).map_err(|_| invalid("port out of range"))?,
                None if implied_port => 0,
                None => return Err(invalid("missing port")),
            };
            let token = args
                .get_bytes(b"token")
                .cloned()
                .ok_or_else(|| invalid("missing token"))?;

            Query::AnnouncePeer {
                info_hash: hash_arg(args, b"info_hash")?,
                port,
                token,
                implied_port,
            }
        }
        other => Query::Unknown(other.to_string()),
    };

    Ok(MessageBody::Query { sender, query })
}

fn decode_response(value: &Value) -> Result<MessageBody, DhtError> {
    let r = value
        .get(b"r")
        .filter(|r| r.as_dict().is_some())
        .ok_or_else(|| invalid("missing response dict"))?;

    let id = NodeId::from(hash_arg(r, b"id")?);

    let nodes = r
        .get_bytes(b"nodes")
        .map(|data| {
            data.chunks_exact(COMPACT_NODE_LEN)
                .filter_map(Node::from_compact)
                .collect()
        })
        .unwrap_or_default();

    let values = r
        .get(b"values")
        .and_then(Value::as_list)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_bytes)
                .filter_map(|b| compact_addr_from_bytes(b.as_ref()))
                .collect()
        })
        .unwrap_or_default();

    Ok(MessageBody::Response(Response {
        id,
        nodes,
        values,
        token: r.get_bytes(b"token").cloned(),
    }))
}

fn decode_error(value: &Value) -> Result<MessageBody, DhtError> {
    let e = value
        .get(b"e")
        .and_then(Value::as_list)
        .ok_or_else(|| invalid("missing error list"))?;

    let code = e.first().and_then(Value::as_int).unwrap_or(error_code::GENERIC);
    let message = e
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    Ok(MessageBody::Error(KrpcError { code, message }))
}
