//! WireGuard fake-packet obfuscation
//!
//! Hides the fixed sizes and type bytes of WireGuard messages from passive
//! fingerprinting. Both peers must be configured with the same mode; nothing
//! here negotiates it.

mod bind;
mod endpoint;
mod fake_packet;
pub mod message;
mod mode;

pub use bind::{ClientBind, PacketBind, REBIND_SETTLE};
pub use endpoint::PeerEndpoint;
pub use fake_packet::{
    send_disguised, FakePacketPolicy, DEFAULT_FAKE_PACKET_DELAY, DEFAULT_FAKE_PACKET_SIZE,
};
pub use message::MessageType;
pub use mode::{FakePacketMode, NamedMode};
