//! Client connections
//!
//! A connection owns its surfaces and an outbox of pending events. Removing
//! a connection is the starting point of the destruction cascade driven by
//! [`CompositorState::disconnect`](crate::compositor::CompositorState::disconnect).

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};

use crate::compositor::event::ClientEvent;
use crate::compositor::SurfaceId;

/// Unique identifier for client connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ConnectionId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One client's protocol session
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Surfaces created by this client
    surfaces: BTreeSet<SurfaceId>,
    /// Events waiting to be sent
    outbox: Vec<ClientEvent>,
    /// Ping serial the client has not answered yet
    pending_ping: Option<u32>,
}

impl Connection {
    fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            surfaces: BTreeSet::new(),
            outbox: Vec::new(),
            pending_ping: None,
        }
    }

    pub fn surfaces(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.surfaces.iter().copied()
    }

    /// Whether the client answered every ping
    pub fn is_responsive(&self) -> bool {
        self.pending_ping.is_none()
    }
}

/// Registry of connected clients
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client
    pub fn create(&mut self) -> ConnectionId {
        let connection = Connection::new();
        let id = connection.id;
        self.connections.insert(id, connection);
        info!("Client {:?} connected", id);
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Remove a connection; the caller cascades to its surfaces
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        info!(
            "Client {:?} disconnected with {} surfaces",
            id,
            connection.surfaces.len()
        );
        Some(connection)
    }

    pub fn add_surface(&mut self, id: ConnectionId, surface: SurfaceId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.surfaces.insert(surface);
        }
    }

    pub fn remove_surface(&mut self, id: ConnectionId, surface: SurfaceId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.surfaces.remove(&surface);
        }
    }

    /// Queue an event; events for departed clients are dropped
    pub fn send(&mut self, id: ConnectionId, event: ClientEvent) {
        match self.connections.get_mut(&id) {
            Some(connection) => connection.outbox.push(event),
            None => debug!("Dropping {:?} for departed client {:?}", event, id),
        }
    }

    /// Take everything queued for a client
    pub fn drain_events(&mut self, id: ConnectionId) -> Vec<ClientEvent> {
        self.connections
            .get_mut(&id)
            .map(|c| std::mem::take(&mut c.outbox))
            .unwrap_or_default()
    }

    /// Clients with queued events
    pub fn with_pending_events(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| !c.outbox.is_empty())
            .map(|c| c.id)
            .collect()
    }

    /// Record a ping sent with `serial`
    pub fn ping_sent(&mut self, id: ConnectionId, serial: u32) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.pending_ping = Some(serial);
        }
    }

    /// Handle a pong; returns false for a serial that was not pending
    pub fn pong(&mut self, id: ConnectionId, serial: u32) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) if connection.pending_ping == Some(serial) => {
                connection.pending_ping = None;
                true
            }
            _ => false,
        }
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_outbox() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.create();
        registry.send(id, ClientEvent::Ping { serial: 1 });
        assert_eq!(registry.with_pending_events(), vec![id]);
        assert_eq!(registry.drain_events(id), vec![ClientEvent::Ping { serial: 1 }]);
        assert!(registry.drain_events(id).is_empty());
    }

    #[test]
    fn test_events_for_departed_client_are_dropped() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.create();
        registry.remove(id);
        registry.send(id, ClientEvent::Ping { serial: 1 });
        assert!(registry.drain_events(id).is_empty());
    }

    #[test]
    fn test_ping_pong() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.create();
        registry.ping_sent(id, 42);
        assert!(!registry.get(id).unwrap().is_responsive());
        assert!(!registry.pong(id, 41));
        assert!(registry.pong(id, 42));
        assert!(registry.get(id).unwrap().is_responsive());
    }

    #[test]
    fn test_surface_membership() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.create();
        registry.add_surface(id, SurfaceId(5));
        assert_eq!(registry.get(id).unwrap().surfaces().collect::<Vec<_>>(), vec![SurfaceId(5)]);
        registry.remove_surface(id, SurfaceId(5));
        assert_eq!(registry.get(id).unwrap().surfaces().count(), 0);
    }
}
