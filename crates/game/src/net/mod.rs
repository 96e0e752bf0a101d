mod peer;
mod pool;
mod protocol;
mod quantize;
mod spsc;
mod transport;

pub use peer::{sequence_offset, MAX_RETRANSMIT_ATTEMPTS, PEER_INACTIVITY_TIMEOUT, WINDOW_SIZE};
pub use pool::PACKET_POOL_SIZE;
pub use protocol::{
    ConnectAccept, ConnectRequest, Encode, InputMessage, Message, MessageKind, PacketHeader,
    PlayerDiedEvent, PlayerLeftEvent, ProtocolError, Reader, SnapshotMessage, Writer, HEADER_SIZE,
    MAX_PACKET_SIZE, PLAYER_NAME_LEN, SERVER_PORT,
};
pub use quantize::{
    dequantize_player, dequantize_shot, quantize_player, quantize_shot, QuantizedPlayer,
    QuantizedShot,
};
pub use spsc::{channel, Consumer, Producer};
pub use transport::{
    hash_addr, PeerError, PeerId, Polled, SendError, Transport, TransportEvent,
    UnknownSenderPolicy, MAX_PEERS,
};
