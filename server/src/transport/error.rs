use thiserror::Error;

use mxo_shared::{CodecError, CompressError, CryptoError, FrameError};

use super::fragment::FragmentError;

/// Errors surfaced by the session transport. Everything except
/// `WindowFull` is datagram-local: the caller drops the datagram and the
/// session carries on.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Compress(#[from] CompressError),

    #[error(transparent)]
    Fragment(#[from] FragmentError),

    /// The outbound reliable window is full; the caller retries on a
    /// later tick.
    #[error("outbound window full ({outstanding}/{window} slots)")]
    WindowFull { outstanding: usize, window: usize },

    /// An encrypted datagram arrived before a session key was bound.
    #[error("encrypted datagram received before session bind")]
    NotBound,
}

/// Session-level policy violations that tear the session down. The
/// transport records at most one; the world tick collects it and moves
/// the session to `Disconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    /// A reliable slot hit the send-count bound without an ack.
    RetransmitLimit { sequence: u16, send_count: u32 },
    /// Nothing heard from the peer inside the connection timeout.
    Timeout,
    /// Too many session decrypt failures inside the failure window.
    CryptoFailures { failures: u32 },
}
