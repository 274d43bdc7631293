//! Command opcodes for the companion protocol.
//!
//! Each outward command starts with an opcode byte, optionally
//! followed by parameters. Multi-byte parameter fields are
//! little-endian unless noted otherwise.

/// Command opcodes sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandOpcode {
    /// Initialize the session, returns `SelfInfo`.
    AppStart = 0x01,
    /// Send a direct message (followed by subtype).
    SendMessage = 0x02,
    /// Send a channel message.
    SendChannelMsg = 0x03,
    /// Request the contact list (optionally newer-than a watermark).
    GetContacts = 0x04,
    /// Get current device time.
    GetTime = 0x05,
    /// Set device time.
    SetTime = 0x06,
    /// Send an advertisement.
    SendAdvert = 0x07,
    /// Set device name.
    SetName = 0x08,
    /// Add or update a contact.
    UpdateContact = 0x09,
    /// Fetch the next waiting message.
    GetMessage = 0x0A,
    /// Set radio parameters.
    SetRadio = 0x0B,
    /// Reset the routing path for a contact back to flood.
    ResetPath = 0x0D,
    /// Set device coordinates.
    SetCoords = 0x0E,
    /// Remove a contact.
    RemoveContact = 0x0F,
    /// Get battery status.
    GetBattery = 0x14,
    /// Query device info.
    DeviceQuery = 0x16,
    /// Send login request to a room server.
    SendLogin = 0x1A,
    /// Send status request.
    SendStatusReq = 0x1B,
    /// Send logout.
    SendLogout = 0x1D,
    /// Get channel info.
    GetChannel = 0x1F,
    /// Set channel name and secret.
    SetChannel = 0x20,
    /// Get/request telemetry.
    Telemetry = 0x27,
    /// Binary request to a remote node.
    BinaryReq = 0x32,
    /// Set flood scope key.
    SetFloodScope = 0x36,
}

impl From<CommandOpcode> for u8 {
    fn from(cmd: CommandOpcode) -> Self {
        cmd as Self
    }
}

/// Message send subtypes (used with `SendMessage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageSendType {
    /// Plain direct message to a contact.
    Direct = 0x00,
    /// CLI command to a contact.
    Command = 0x01,
}

impl From<MessageSendType> for u8 {
    fn from(msg: MessageSendType) -> Self {
        msg as Self
    }
}

/// Binary request kinds routed by the (key-prefix, kind) index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinaryReqKind {
    /// Request device status.
    Status = 0x01,
    /// Keep-alive ping, no response expected.
    KeepAlive = 0x02,
    /// Request telemetry data (LPP format).
    Telemetry = 0x03,
    /// Request min/max/avg measurements.
    Mma = 0x04,
    /// Request access control list.
    Acl = 0x05,
}

impl BinaryReqKind {
    /// Attempts to parse a binary request kind from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Status),
            0x02 => Some(Self::KeepAlive),
            0x03 => Some(Self::Telemetry),
            0x04 => Some(Self::Mma),
            0x05 => Some(Self::Acl),
            _ => None,
        }
    }

    /// Returns true if this request kind expects a reply frame.
    #[must_use]
    pub const fn expects_response(self) -> bool {
        !matches!(self, Self::KeepAlive)
    }
}

impl From<BinaryReqKind> for u8 {
    fn from(req: BinaryReqKind) -> Self {
        req as Self
    }
}
