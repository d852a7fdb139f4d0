//! Protocol implementations.

pub mod crc;
pub mod ethernet;
pub mod frame_buffer;
pub mod packet;
pub mod request;
pub mod uart;

// Re-export common types
pub use ethernet::MacAddr;
pub use frame_buffer::FrameBuffer;
pub use packet::{Command, Decoded, Framing, Packet, PacketType, PendingCommand, decode};
pub use request::{ReadPolicy, request, wait_for};
