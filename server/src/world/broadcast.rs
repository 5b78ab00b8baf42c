use mxo_shared::{Block, District};

use crate::session_index::SessionId;

/// A routed outbound message. Broadcasts carry ids, never references:
/// the tick resolves targets against the session index when it flushes.
#[derive(Debug, Clone)]
pub enum Outgoing {
    ToSession {
        session: SessionId,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
    },
    ToHandle {
        handle: String,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
    },
    ToDistrict {
        district: District,
        except: Option<SessionId>,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
    },
    ToAll {
        except: Option<SessionId>,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
    },
}

/// Messages queued during a tick, flushed through the session transports
/// at the end of the tick body so every target observes a consistent
/// world snapshot.
#[derive(Default)]
pub struct Outbox {
    queue: Vec<Outgoing>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push(&mut self, outgoing: Outgoing) {
        self.queue.push(outgoing);
    }

    pub fn to_session(
        &mut self,
        session: SessionId,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
    ) {
        self.queue.push(Outgoing::ToSession {
            session,
            message_type,
            blocks,
            reliable,
        });
    }

    pub fn to_handle(
        &mut self,
        handle: &str,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
    ) {
        self.queue.push(Outgoing::ToHandle {
            handle: handle.to_string(),
            message_type,
            blocks,
            reliable,
        });
    }

    pub fn to_district(
        &mut self,
        district: District,
        except: Option<SessionId>,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
    ) {
        self.queue.push(Outgoing::ToDistrict {
            district,
            except,
            message_type,
            blocks,
            reliable,
        });
    }

    pub fn to_all(
        &mut self,
        except: Option<SessionId>,
        message_type: u16,
        blocks: Vec<Block>,
        reliable: bool,
    ) {
        self.queue.push(Outgoing::ToAll {
            except,
            message_type,
            blocks,
            reliable,
        });
    }

    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.queue)
    }

    /// Puts unflushed messages back at the front, preserving emission
    /// order for the next tick.
    pub fn requeue(&mut self, leftovers: Vec<Outgoing>) {
        let mut queue = leftovers;
        queue.append(&mut self.queue);
        self.queue = queue;
    }
}
