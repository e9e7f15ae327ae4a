use chrono::{DateTime, Local};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct ConnInfo {
    pub peer: SocketAddr,
    pub name: Option<String>,
    pub connected_at: DateTime<Local>,
}

/// Live connections, keyed by an id handed out at accept time.
#[derive(Clone, Default)]
pub struct ServerState {
    conns: Arc<DashMap<u64, ConnInfo>>,
    next_id: Arc<AtomicU64>,
}

impl ServerState {
    pub fn register(&self, peer: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.conns.insert(
            id,
            ConnInfo {
                peer,
                name: None,
                connected_at: Local::now(),
            },
        );

        id
    }

    pub fn set_name(&self, id: u64, name: &str) {
        if let Some(mut info) = self.conns.get_mut(&id) {
            info.name = Some(name.to_string());
        }
    }

    pub fn remove(&self, id: u64) {
        self.conns.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn list_connections(&self) -> Vec<(u64, ConnInfo)> {
        self.conns
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Deregisters `id` when dropped, whichever way the reader exits.
    pub fn guard(&self, id: u64) -> ConnGuard {
        ConnGuard {
            state: self.clone(),
            id,
        }
    }
}

pub struct ConnGuard {
    state: ServerState,
    id: u64,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.state.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn register_hands_out_distinct_ids() {
        let state = ServerState::default();
        let a = state.register(peer(1000));
        let b = state.register(peer(1001));

        assert_ne!(a, b);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn set_name_is_visible_in_listing() {
        let state = ServerState::default();
        let id = state.register(peer(1000));
        state.set_name(id, "alice");

        let conns = state.list_connections();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].0, id);
        assert_eq!(conns[0].1.name.as_deref(), Some("alice"));
        assert_eq!(conns[0].1.peer, peer(1000));
    }

    #[test]
    fn guard_deregisters_on_drop() {
        let state = ServerState::default();
        let id = state.register(peer(1000));
        let keep = state.register(peer(1001));

        {
            let _guard = state.guard(id);
            assert_eq!(state.len(), 2);
        }

        assert_eq!(state.len(), 1);
        assert_eq!(state.list_connections()[0].0, keep);
    }
}
