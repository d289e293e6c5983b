//! Gateway client transport: WebSocket connection, handshake, RPC, and
//! binary terminal streams.
//!
//! One WebSocket carries three multiplexed concerns: a versioned handshake,
//! a JSON request/response channel with server-pushed events, and a binary
//! channel for terminal I/O. Consumers use the transport's four operations
//! (start, stop, call, send_binary) and its three streams (state, events,
//! binary messages).

mod events;
mod frames;
mod pending;
mod protocol;
mod transport;

pub use events::Subscription;
pub use pending::CallOutcome;
pub use frames::{
    decode_frame, encode_frame, BinaryFrame, FrameError, StreamKind, FRAME_HEADER_LEN,
};
pub use protocol::{
    parse_inbound, ClientHello, HelloReject, InboundFrame, ProtocolRange, RejectCode, RpcErrorBody,
    RpcEvent, RpcRequest, RpcResponse, ServerHello, ServiceDescriptor, PROTOCOL_MAX, PROTOCOL_MIN,
};
pub use transport::{
    CallError, ConnectionStatus, GatewayTransport, TransportOptions, TransportState,
};
