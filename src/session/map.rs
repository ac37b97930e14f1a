//! In-memory session map: keyed by remote address, mutated only by its
//! owning connection's open/close events.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub imei: String,
    pub connected_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(imei: String) -> Self {
        SessionHandle {
            imei,
            connected_at: Utc::now(),
        }
    }
}

/// Cheaply cloneable handle shared across the TCP acceptor's spawned tasks.
#[derive(Clone, Default)]
pub struct SessionMap {
    inner: Arc<RwLock<HashMap<SocketAddr, SessionHandle>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        SessionMap::default()
    }

    pub async fn insert(&self, remote: SocketAddr, handle: SessionHandle) {
        self.inner.write().await.insert(remote, handle);
    }

    pub async fn remove(&self, remote: &SocketAddr) {
        self.inner.write().await.remove(remote);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_remove_round_trip() {
        let map = SessionMap::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        map.insert(addr, SessionHandle::new("864275079658715".to_string())).await;
        assert_eq!(map.len().await, 1);
        map.remove(&addr).await;
        assert_eq!(map.len().await, 0);
    }
}
