use std::net::SocketAddr;

use smol::channel::{self, Receiver, Sender, TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

/// Unbounded (address, payload) channel between the socket thread and the
/// world thread.
pub struct PacketChannel;

impl PacketChannel {
    pub fn unbounded() -> (PacketSender, PacketReceiver) {
        let (sender, receiver) = channel::unbounded();
        (PacketSender { sender }, PacketReceiver { receiver })
    }
}

#[derive(Clone)]
pub struct PacketSender {
    sender: Sender<(SocketAddr, Box<[u8]>)>,
}

impl PacketSender {
    pub fn send(&self, address: SocketAddr, payload: &[u8]) -> Result<(), SendError> {
        self.sender
            .send_blocking((address, payload.into()))
            .map_err(|_| SendError)
    }
}

pub struct PacketReceiver {
    receiver: Receiver<(SocketAddr, Box<[u8]>)>,
}

impl PacketReceiver {
    /// Non-blocking receive; `Ok(None)` when the queue is empty.
    pub fn try_receive(&mut self) -> Result<Option<(SocketAddr, Box<[u8]>)>, RecvError> {
        match self.receiver.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(RecvError),
        }
    }

    /// Blocking receive with a bounded wait, used by the world thread to
    /// sleep out the remainder of a tick without missing ingress.
    pub fn receive_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<(SocketAddr, Box<[u8]>)>, RecvError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.receiver.try_recv() {
                Ok(item) => return Ok(Some(item)),
                Err(TryRecvError::Closed) => return Err(RecvError),
                Err(TryRecvError::Empty) => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            }
        }
    }
}
