use std::net::SocketAddr;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::debug;

const SECRET_LEN: usize = 10;

/// Issues and checks the write tokens handed out in `get_peers` replies.
///
/// A token is `SHA1(compact address || secret)`. Two secrets are kept, so a
/// token stays valid for at least one and at most two rotation periods.
pub struct TokenManager {
    current: [u8; SECRET_LEN],
    previous: [u8; SECRET_LEN],
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
        }
    }

    pub fn generate_token(&self, addr: &SocketAddr) -> Bytes {
        token_for(addr, &self.current)
    }

    pub fn verify_token(&self, addr: &SocketAddr, token: &[u8]) -> bool {
        token == token_for(addr, &self.current).as_ref()
            || token == token_for(addr, &self.previous).as_ref()
    }

    pub fn refresh_tokens(&mut self) {
        self.previous = self.current;
        self.current = rand::random();
        debug!("DHT token secret rotated");
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

fn token_for(addr: &SocketAddr, secret: &[u8; SECRET_LEN]) -> Bytes {
    let mut hasher = Sha1::new();
    match addr {
        SocketAddr::V4(v4) => {
            hasher.update(v4.ip().octets());
            hasher.update(v4.port().to_be_bytes());
        }
        SocketAddr::V6(v6) => {
            hasher.update(v6.ip().octets());
            hasher.update(v6.port().to_be_bytes());
        }
    }
    hasher.update(secret);
    Bytes::copy_from_slice(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8, port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], port))
    }

    #[test]
    fn test_token_survives_one_rotation_only() {
        let mut tokens = TokenManager::new();
        let peer = addr(1, 6881);
        let token = tokens.generate_token(&peer);

        assert!(tokens.verify_token(&peer, &token));
        tokens.refresh_tokens();
        assert!(tokens.verify_token(&peer, &token));
        tokens.refresh_tokens();
        assert!(!tokens.verify_token(&peer, &token));
    }

    #[test]
    fn test_token_is_bound_to_address() {
        let tokens = TokenManager::new();
        let token = tokens.generate_token(&addr(1, 6881));

        assert!(!tokens.verify_token(&addr(2, 6881), &token));
        assert!(!tokens.verify_token(&addr(1, 6882), &token));
    }

    #[test]
    fn test_token_is_stable_between_rotations() {
        let tokens = TokenManager::new();
        let peer = addr(7, 51413);
        assert_eq!(tokens.generate_token(&peer), tokens.generate_token(&peer));
        assert_eq!(tokens.generate_token(&peer).len(), 20);
    }

    #[test]
    fn test_garbage_token_rejected() {
        let tokens = TokenManager::new();
        assert!(!tokens.verify_token(&addr(1, 1), b""));
        assert!(!tokens.verify_token(&addr(1, 1), b"not-a-token"));
    }
}
