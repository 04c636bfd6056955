//! Registry of live capture endpoints.
//!
//! An endpoint exists for the lifetime of its authenticated connection; all
//! other components refer to it by id only.

use std::net::SocketAddr;

use dashmap::DashMap;
use uuid::Uuid;

/// One authenticated capture peer.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: Uuid,
    /// Peer network address, kept for diagnostics.
    pub addr: SocketAddr,
}

/// Thread-safe map of live endpoints, keyed by server-minted id.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<Uuid, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh id for a newly authenticated peer and record it.
    pub fn register(&self, addr: SocketAddr) -> Uuid {
        let id = Uuid::new_v4();
        self.endpoints.insert(id, Endpoint { id, addr });
        id
    }

    pub fn remove(&self, id: Uuid) {
        self.endpoints.remove(&id);
    }

    pub fn get(&self, id: Uuid) -> Option<Endpoint> {
        self.endpoints.get(&id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
