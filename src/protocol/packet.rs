//! Packet codes for inbound frames.
//!
//! The first byte of every inbound payload identifies what follows.
//! Codes below 0x80 are correlated command responses; codes with the
//! high bit set are unsolicited push notifications.

/// Response and push notification packet codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketCode {
    // Command responses (0x00-0x1F)
    /// Command executed successfully.
    Ok = 0x00,
    /// Command failed with error.
    Error = 0x01,
    /// Start of contact list.
    ContactStart = 0x02,
    /// Contact record.
    Contact = 0x03,
    /// End of contact list (carries the sync watermark).
    ContactEnd = 0x04,
    /// Self device information.
    SelfInfo = 0x05,
    /// Message accepted for transmission (with ack code).
    MsgSent = 0x06,
    /// Received a direct message.
    ContactMsgRecv = 0x07,
    /// Received a channel message.
    ChannelMsgRecv = 0x08,
    /// Current device time.
    CurrentTime = 0x09,
    /// No more messages waiting.
    NoMoreMsgs = 0x0A,
    /// Battery status.
    Battery = 0x0C,
    /// Device information.
    DeviceInfo = 0x0D,
    /// Direct message with SNR (v3).
    ContactMsgRecvV3 = 0x10,
    /// Channel message with SNR (v3).
    ChannelMsgRecvV3 = 0x11,
    /// Channel information.
    ChannelInfo = 0x12,

    // Push notifications (0x80-0x8F)
    /// Advertisement from another node.
    Advertisement = 0x80,
    /// Routing path update notification.
    PathUpdate = 0x81,
    /// Acknowledgment received.
    Ack = 0x82,
    /// Messages are waiting on the device.
    MessagesWaiting = 0x83,
    /// Login successful.
    LoginSuccess = 0x85,
    /// Login failed.
    LoginFailed = 0x86,
    /// Remote status response.
    StatusResponse = 0x87,
    /// New advertisement with full contact data.
    PushNewAdvert = 0x8A,
    /// Telemetry response.
    TelemetryResponse = 0x8B,
    /// Binary response (key-prefix + kind routed).
    BinaryResponse = 0x8C,
}

impl PacketCode {
    /// Attempts to parse a packet code from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Ok),
            0x01 => Some(Self::Error),
            0x02 => Some(Self::ContactStart),
            0x03 => Some(Self::Contact),
            0x04 => Some(Self::ContactEnd),
            0x05 => Some(Self::SelfInfo),
            0x06 => Some(Self::MsgSent),
            0x07 => Some(Self::ContactMsgRecv),
            0x08 => Some(Self::ChannelMsgRecv),
            0x09 => Some(Self::CurrentTime),
            0x0A => Some(Self::NoMoreMsgs),
            0x0C => Some(Self::Battery),
            0x0D => Some(Self::DeviceInfo),
            0x10 => Some(Self::ContactMsgRecvV3),
            0x11 => Some(Self::ChannelMsgRecvV3),
            0x12 => Some(Self::ChannelInfo),
            0x80 => Some(Self::Advertisement),
            0x81 => Some(Self::PathUpdate),
            0x82 => Some(Self::Ack),
            0x83 => Some(Self::MessagesWaiting),
            0x85 => Some(Self::LoginSuccess),
            0x86 => Some(Self::LoginFailed),
            0x87 => Some(Self::StatusResponse),
            0x8A => Some(Self::PushNewAdvert),
            0x8B => Some(Self::TelemetryResponse),
            0x8C => Some(Self::BinaryResponse),
            _ => None,
        }
    }

    /// Returns true for unsolicited push notifications.
    #[must_use]
    pub const fn is_push(self) -> bool {
        (self as u8) >= 0x80
    }

    /// Returns true for correlated command responses.
    #[must_use]
    pub const fn is_response(self) -> bool {
        !self.is_push()
    }
}

impl From<PacketCode> for u8 {
    fn from(code: PacketCode) -> Self {
        code as Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_byte_round_trip() {
        assert_eq!(PacketCode::from_byte(0x00), Some(PacketCode::Ok));
        assert_eq!(PacketCode::from_byte(0x8C), Some(PacketCode::BinaryResponse));
        assert_eq!(PacketCode::from_byte(0xFF), None);
    }

    #[test]
    fn push_split() {
        assert!(PacketCode::Advertisement.is_push());
        assert!(PacketCode::Ack.is_push());
        assert!(PacketCode::SelfInfo.is_response());
        assert!(!PacketCode::Ok.is_push());
    }
}
