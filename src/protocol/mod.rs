//! Wire protocol: stream framing, opcodes, packet codes, and the
//! payload codec.

pub mod codec;
pub mod command;
pub mod frame;
pub mod packet;

pub use codec::{Decoded, MAX_TEXT_LEN};
pub use command::{BinaryReqKind, CommandOpcode, MessageSendType};
pub use frame::{FrameDecoder, FRAME_HEADER, FRAME_OVERHEAD, MAX_FRAME_SIZE};
pub use packet::PacketCode;
