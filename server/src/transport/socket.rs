use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info};

use super::channel::PacketSender;

const RECV_BUFFER_LEN: usize = 2048;
const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// The game server's UDP socket. The ingress thread owns the blocking
/// receive path and pushes datagrams onto the world thread's channel;
/// egress goes straight out from whichever thread holds a handle.
#[derive(Clone)]
pub struct ServerSocket {
    socket: Arc<UdpSocket>,
}

impl ServerSocket {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_POLL_TIMEOUT))?;
        info!("game transport listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn send_to(&self, addr: SocketAddr, payload: &[u8]) {
        if let Err(e) = self.socket.send_to(payload, addr) {
            debug!("dropping outbound datagram to {addr}: {e}");
        }
    }

    /// Spawns the ingress thread. It polls with a bounded timeout so the
    /// stop flag is observed promptly.
    pub fn spawn_ingress(&self, sender: PacketSender, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        std::thread::Builder::new()
            .name("mxo-ingress".to_string())
            .spawn(move || {
                let mut buffer = [0u8; RECV_BUFFER_LEN];
                while !stop.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buffer) {
                        Ok((len, addr)) => {
                            if sender.send(addr, &buffer[..len]).is_err() {
                                // world thread is gone; nothing left to feed
                                break;
                            }
                        }
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            error!("ingress receive error: {e}");
                            break;
                        }
                    }
                }
                debug!("ingress thread exiting");
            })
            .expect("failed to spawn ingress thread")
    }
}
