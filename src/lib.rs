//! # meshcore-session
//!
//! Protocol and session engine for `MeshCore` companion radios.
//!
//! The crate speaks the companion serial protocol over any async byte
//! stream and layers a correlated command/response session on top of
//! it, plus the end-to-end crypto used for direct messages on the
//! mesh itself.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Tagged request registry correlating commands with their replies
//! - Event broadcast for unsolicited pushes (adverts, ACKs, messages)
//! - X25519 + AES-128 direct message encryption with truncated MACs
//! - Contact cache with incremental sync and duplicate suppression
//!
//! ## Quick Start
//!
//! ```no_run
//! use meshcore_session::{Session, StreamTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), meshcore_session::Error> {
//!     // any AsyncRead + AsyncWrite stream works: a serial port,
//!     // a TCP socket, or an in-memory pipe
//!     let (stream, _peer) = tokio::io::duplex(4096);
//!     let session = Session::connect_with_defaults(StreamTransport::new(stream)).await?;
//!
//!     if let Some(info) = session.self_info() {
//!         println!("Connected to: {}", info.name);
//!         println!("Public key: {}", info.public_key);
//!     }
//!
//!     let battery = session.get_battery().await?;
//!     println!("Battery: {}mV", battery.millivolts);
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Low-level protocol types (frames, opcodes, codec)
//! - [`types`] - Data structures (contacts, devices, messages, telemetry)
//! - [`transport`] - Transport seam over async byte streams
//! - [`event`] - Broadcast of decoded events to subscribers
//! - [`registry`] - Pending request registry and reply correlation
//! - [`crypto`] - Direct message encryption and key derivation
//! - [`session`] - High-level [`Session`] orchestrator

pub mod contacts;
pub mod crypto;
pub mod dedup;
pub mod error;
pub mod event;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use contacts::ContactCache;
pub use dedup::{ConversationKey, DedupConfig, MessageDedupCache};
pub use error::{CryptoError, Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventSubscription};
pub use protocol::{BinaryReqKind, CommandOpcode, MessageSendType, PacketCode};
pub use registry::{PendingReply, RequestRegistry};
pub use session::{
    InboundMessage, MessageReceipt, Session, SessionConfig, parse_public_key,
};
pub use transport::{StreamTransport, Transport};
pub use types::{
    Acknowledgment, BatteryStatus, Channel, ChannelMessage, Contact, ContactFlags, ContactType,
    DeviceInfo, DirectMessage, LppDataPoint, LppValue, PublicKey, RadioConfig, RemoteStatus,
    SelfInfo, SignalQuality, Telemetry, TextType,
};
