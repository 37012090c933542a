//! Art-Net output: packet codec, node discovery and the send/listen engine.

pub mod codec;
pub mod engine;
pub mod nodes;

pub use codec::{ArtPacket, CodecError, PortAddress, broadcast_address_for};
pub use engine::{ArtNetConfig, ArtNetEngine, ArtNetError, detect_local_ip};
pub use nodes::{ArtNetNode, NODE_TIMEOUT, NodeRegistry};
