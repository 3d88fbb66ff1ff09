use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid node id length: {0}")]
    InvalidNodeId(usize),

    #[error("node id subtraction underflow")]
    Underflow,

    #[error("invalid node data: {0} bytes is not a whole number of 26-byte records")]
    InvalidNodeData(usize),

    #[error("invalid token")]
    InvalidToken,

    #[error("dht engine stopped")]
    EngineStopped,
}
