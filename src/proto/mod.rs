//! Wire protocol: frame codec, packet header, and typed request/response
//! bodies.
//!
//! The frame codec (`frame`) never interprets payload bytes; the packet
//! codec (`header`, `request`, `response`) is the only layer that knows
//! about message kinds and field layouts.

pub mod codec;
pub mod frame;
pub mod header;
pub mod request;
pub mod response;

pub use frame::{Frame, FrameIo, RecvOutcome};
pub use header::{MessageKind, PacketHeader, CURRENT_VERSION};
pub use request::Request;
pub use response::Response;
