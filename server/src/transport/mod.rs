mod channel;
mod error;
mod fragment;
mod session;
mod socket;

pub use channel::{PacketChannel, PacketReceiver, PacketSender, RecvError, SendError};
pub use error::{TransportError, TransportFault};
pub use fragment::{split_unit, FragmentError, Reassembly, FRAGMENT_PREFIX_LEN};
pub use session::{DeliveredMessage, ReliableSlot, SessionTransport};
pub use socket::ServerSocket;
