use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use mxo_shared::SESSION_KEY_LEN;

/// Opaque per-session key handed out at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn to_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// The handoff tuple the authentication stream deposits for the game
/// transport to consume on handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub character_id: u64,
    pub account_id: u32,
    pub session_key: [u8; SESSION_KEY_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("character {character_id} is already logged in")]
    AlreadyLoggedIn { character_id: u64 },

    #[error("peer {0} already has a bound session")]
    DuplicateAddress(SocketAddr),

    #[error("handle {0:?} is already bound")]
    DuplicateHandle(String),

    #[error("no ticket deposited for character {character_id}")]
    UnknownTicket { character_id: u64 },

    #[error("session key mismatch for character {character_id}")]
    KeyMismatch { character_id: u64 },

    #[error("server is full ({max} connections)")]
    ServerFull { max: usize },
}

#[derive(Default)]
struct Inner {
    by_addr: HashMap<SocketAddr, SessionId>,
    by_character: HashMap<u64, SessionId>,
    by_handle: HashMap<String, SessionId>,
    tickets: HashMap<u64, SessionTicket>,
}

/// Thread-safe session lookup: peer address, character handle, and
/// character id all map to the same session. The auth server writes
/// tickets in; the game transport consumes them at handshake.
///
/// Writes (bind/unbind) are rare next to routing lookups, so a
/// reader-writer lock guards the maps.
#[derive(Default)]
pub struct SessionIndex {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // Ticket handoff

    pub fn deposit_ticket(&self, ticket: SessionTicket) {
        let mut inner = self.inner.write();
        inner.tickets.insert(ticket.character_id, ticket);
    }

    /// Checks a handshake's claim against the deposited ticket without
    /// consuming it; the ticket is consumed on a successful bind.
    pub fn validate_ticket(
        &self,
        character_id: u64,
        session_key: &[u8],
    ) -> Result<SessionTicket, SessionError> {
        let inner = self.inner.read();
        let ticket = inner
            .tickets
            .get(&character_id)
            .ok_or(SessionError::UnknownTicket { character_id })?;
        if ticket.session_key != session_key {
            return Err(SessionError::KeyMismatch { character_id });
        }
        Ok(ticket.clone())
    }

    /// Binds a session into all three maps, consuming the ticket.
    /// At most one session may exist per character id and per peer
    /// address; a violation leaves the prior session intact.
    pub fn bind(
        &self,
        addr: SocketAddr,
        character_id: u64,
        handle: &str,
    ) -> Result<SessionId, SessionError> {
        let mut inner = self.inner.write();
        if inner.by_character.contains_key(&character_id) {
            return Err(SessionError::AlreadyLoggedIn { character_id });
        }
        if inner.by_addr.contains_key(&addr) {
            return Err(SessionError::DuplicateAddress(addr));
        }
        if inner.by_handle.contains_key(handle) {
            return Err(SessionError::DuplicateHandle(handle.to_string()));
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        inner.by_addr.insert(addr, id);
        inner.by_character.insert(character_id, id);
        inner.by_handle.insert(handle.to_string(), id);
        inner.tickets.remove(&character_id);
        Ok(id)
    }

    /// Removes a session from every map it appears in.
    pub fn unbind(&self, id: SessionId) {
        let mut inner = self.inner.write();
        inner.by_addr.retain(|_, v| *v != id);
        inner.by_character.retain(|_, v| *v != id);
        inner.by_handle.retain(|_, v| *v != id);
    }

    pub fn session_by_addr(&self, addr: &SocketAddr) -> Option<SessionId> {
        self.inner.read().by_addr.get(addr).copied()
    }

    pub fn session_by_character(&self, character_id: u64) -> Option<SessionId> {
        self.inner.read().by_character.get(&character_id).copied()
    }

    pub fn session_by_handle(&self, handle: &str) -> Option<SessionId> {
        self.inner.read().by_handle.get(handle).copied()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().by_character.len()
    }

    pub fn is_full(&self, max: usize) -> bool {
        self.session_count() >= max
    }
}
