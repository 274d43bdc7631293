//! Command payload builders and the inbound payload decoder.
//!
//! Encoding produces the opcode-first payloads the device expects;
//! multi-byte command fields are little-endian. Decoding is total:
//! an unrecognized packet code or a truncated payload yields
//! [`Decoded::Unrecognized`], never an error, so one garbled frame
//! cannot wedge the dispatch loop.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::command::{BinaryReqKind, CommandOpcode, MessageSendType};
use crate::protocol::packet::PacketCode;
use crate::types::contact::{
    Contact, ContactFlags, ContactType, PublicKey, MAX_NAME_LEN, MAX_PATH_LEN,
    PUBLIC_KEY_PREFIX_LEN,
};
use crate::types::device::{
    BatteryStatus, Channel, DeviceInfo, RadioConfig, RemoteStatus, SelfInfo,
};
use crate::types::message::{
    Acknowledgment, ChannelMessage, DirectMessage, SignalQuality, TextType,
};
use crate::types::telemetry::Telemetry;

/// Coordinate scaling factor (microdegrees on the wire).
const COORD_SCALE: f64 = 1_000_000.0;

/// SNR scaling factor (raw value is multiplied by 4 in the protocol).
const SNR_SCALE: f32 = 4.0;

/// Maximum message text length accepted by firmware.
pub const MAX_TEXT_LEN: usize = 160;

/// Outcome of decoding one inbound payload.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// A correlated command response.
    Response { code: PacketCode, event: Event },
    /// An unsolicited push notification.
    Push { code: PacketCode, event: Event },
    /// Unknown code or payload that failed structural parsing.
    Unrecognized { first_byte: Option<u8>, data: Vec<u8> },
}

// ==================== command builders ====================

/// Builds the session-initialization command.
///
/// Byte 2 is the companion protocol version, followed by six reserved
/// bytes and the client identifier string.
#[must_use]
pub fn encode_app_start(client_id: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + client_id.len());
    buf.put_u8(CommandOpcode::AppStart as u8);
    buf.put_u8(0x03);
    buf.put_bytes(b' ', 6);
    buf.put_slice(client_id.as_bytes());
    buf.freeze()
}

#[must_use]
pub fn encode_get_time() -> Bytes {
    Bytes::from_static(&[CommandOpcode::GetTime as u8])
}

#[must_use]
pub fn encode_set_time(timestamp: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(CommandOpcode::SetTime as u8);
    buf.put_u32_le(timestamp);
    buf.freeze()
}

#[must_use]
pub fn encode_get_battery() -> Bytes {
    Bytes::from_static(&[CommandOpcode::GetBattery as u8])
}

/// Builds the device-info query (sub-type 0x03 requests full info).
#[must_use]
pub fn encode_device_query() -> Bytes {
    Bytes::from_static(&[CommandOpcode::DeviceQuery as u8, 0x03])
}

#[must_use]
pub fn encode_send_advert(flood: bool) -> Bytes {
    if flood {
        Bytes::from_static(&[CommandOpcode::SendAdvert as u8, 0x01])
    } else {
        Bytes::from_static(&[CommandOpcode::SendAdvert as u8])
    }
}

/// Builds the set-name command.
///
/// # Errors
///
/// Returns `InvalidInput` if the name exceeds 32 bytes.
pub fn encode_set_name(name: &str) -> Result<Bytes> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput {
            reason: format!("name exceeds {MAX_NAME_LEN} bytes"),
        });
    }
    let mut buf = BytesMut::with_capacity(1 + name.len());
    buf.put_u8(CommandOpcode::SetName as u8);
    buf.put_slice(name.as_bytes());
    Ok(buf.freeze())
}

/// Builds the set-coordinates command (microdegrees, 0 = unset).
///
/// # Errors
///
/// Returns `InvalidInput` if either coordinate is out of range.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_set_coords(latitude: f64, longitude: f64) -> Result<Bytes> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(Error::InvalidInput {
            reason: format!("latitude {latitude} out of range (-90 to 90)"),
        });
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::InvalidInput {
            reason: format!("longitude {longitude} out of range (-180 to 180)"),
        });
    }
    let mut buf = BytesMut::with_capacity(13);
    buf.put_u8(CommandOpcode::SetCoords as u8);
    buf.put_i32_le((latitude * COORD_SCALE).round() as i32);
    buf.put_i32_le((longitude * COORD_SCALE).round() as i32);
    buf.put_i32_le(0); // reserved/altitude
    Ok(buf.freeze())
}

/// Builds the set-radio command (frequency and bandwidth travel as
/// kHz and Hz respectively).
///
/// # Errors
///
/// Returns `InvalidInput` for parameters outside LoRa ranges.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn encode_set_radio(config: &RadioConfig) -> Result<Bytes> {
    if !(100.0..=2500.0).contains(&config.frequency_mhz) {
        return Err(Error::InvalidInput {
            reason: format!("frequency {} MHz out of range", config.frequency_mhz),
        });
    }
    if !(7.8..=500.0).contains(&config.bandwidth_khz) {
        return Err(Error::InvalidInput {
            reason: format!("bandwidth {} kHz out of range", config.bandwidth_khz),
        });
    }
    if !(6..=12).contains(&config.spreading_factor) {
        return Err(Error::InvalidInput {
            reason: format!("spreading factor {} out of range (6-12)", config.spreading_factor),
        });
    }
    if !(5..=8).contains(&config.coding_rate) {
        return Err(Error::InvalidInput {
            reason: format!("coding rate {} out of range (5-8)", config.coding_rate),
        });
    }
    let mut buf = BytesMut::with_capacity(11);
    buf.put_u8(CommandOpcode::SetRadio as u8);
    buf.put_u32_le((config.frequency_mhz * 1000.0).round() as u32);
    buf.put_u32_le((config.bandwidth_khz * 1000.0).round() as u32);
    buf.put_u8(config.spreading_factor);
    buf.put_u8(config.coding_rate);
    Ok(buf.freeze())
}

/// Builds the contact-list request, optionally limited to contacts
/// modified after `since`.
#[must_use]
pub fn encode_get_contacts(since: Option<u32>) -> Bytes {
    match since {
        Some(ts) => {
            let mut buf = BytesMut::with_capacity(5);
            buf.put_u8(CommandOpcode::GetContacts as u8);
            buf.put_u32_le(ts);
            buf.freeze()
        }
        None => Bytes::from_static(&[CommandOpcode::GetContacts as u8]),
    }
}

/// Builds the add-or-update contact command from a full record.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn encode_update_contact(contact: &Contact) -> Bytes {
    let mut buf = BytesMut::with_capacity(148);
    buf.put_u8(CommandOpcode::UpdateContact as u8);
    buf.put_slice(contact.public_key.as_bytes());
    buf.put_u8(contact.contact_type as u8);
    buf.put_u8(contact.flags.as_byte());
    buf.put_i8(contact.out_path_len);

    let path_len = contact.out_path.len().min(MAX_PATH_LEN);
    buf.put_slice(&contact.out_path[..path_len]);
    buf.put_bytes(0, MAX_PATH_LEN - path_len);

    let name_bytes = contact.name.as_bytes();
    let name_len = name_bytes.len().min(MAX_NAME_LEN);
    buf.put_slice(&name_bytes[..name_len]);
    buf.put_bytes(0, MAX_NAME_LEN - name_len);

    buf.put_u32_le(contact.last_advert);
    buf.put_i32_le(
        contact
            .latitude
            .map_or(0, |v| (v * COORD_SCALE).round() as i32),
    );
    buf.put_i32_le(
        contact
            .longitude
            .map_or(0, |v| (v * COORD_SCALE).round() as i32),
    );
    buf.put_u32_le(contact.last_modified);
    buf.freeze()
}

#[must_use]
pub fn encode_remove_contact(public_key: &PublicKey) -> Bytes {
    let mut buf = BytesMut::with_capacity(33);
    buf.put_u8(CommandOpcode::RemoveContact as u8);
    buf.put_slice(public_key.as_bytes());
    buf.freeze()
}

#[must_use]
pub fn encode_reset_path(public_key: &PublicKey) -> Bytes {
    let mut buf = BytesMut::with_capacity(33);
    buf.put_u8(CommandOpcode::ResetPath as u8);
    buf.put_slice(public_key.as_bytes());
    buf.freeze()
}

#[must_use]
pub fn encode_get_message() -> Bytes {
    Bytes::from_static(&[CommandOpcode::GetMessage as u8])
}

/// Builds a direct-message send command.
///
/// # Errors
///
/// Returns `DataTooLarge` if the text exceeds [`MAX_TEXT_LEN`].
pub fn encode_send_message(
    send_type: MessageSendType,
    attempt: u8,
    timestamp: u32,
    destination: &PublicKey,
    text: &str,
) -> Result<Bytes> {
    if text.len() > MAX_TEXT_LEN {
        return Err(Error::DataTooLarge {
            size: text.len(),
            max: MAX_TEXT_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(13 + text.len());
    buf.put_u8(CommandOpcode::SendMessage as u8);
    buf.put_u8(send_type as u8);
    buf.put_u8(attempt);
    buf.put_u32_le(timestamp);
    buf.put_slice(&destination.prefix());
    buf.put_slice(text.as_bytes());
    Ok(buf.freeze())
}

/// Builds a channel-message send command.
///
/// # Errors
///
/// Returns `DataTooLarge` if the text exceeds [`MAX_TEXT_LEN`].
pub fn encode_send_channel_message(
    channel_index: u8,
    timestamp: u32,
    text: &str,
) -> Result<Bytes> {
    if text.len() > MAX_TEXT_LEN {
        return Err(Error::DataTooLarge {
            size: text.len(),
            max: MAX_TEXT_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(7 + text.len());
    buf.put_u8(CommandOpcode::SendChannelMsg as u8);
    buf.put_u8(0x00); // reserved
    buf.put_u8(channel_index);
    buf.put_u32_le(timestamp);
    buf.put_slice(text.as_bytes());
    Ok(buf.freeze())
}

#[must_use]
pub fn encode_send_login(destination: &PublicKey, password: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(33 + password.len());
    buf.put_u8(CommandOpcode::SendLogin as u8);
    buf.put_slice(destination.as_bytes());
    buf.put_slice(password.as_bytes());
    buf.freeze()
}

#[must_use]
pub fn encode_send_logout(destination: &PublicKey) -> Bytes {
    let mut buf = BytesMut::with_capacity(33);
    buf.put_u8(CommandOpcode::SendLogout as u8);
    buf.put_slice(destination.as_bytes());
    buf.freeze()
}

#[must_use]
pub fn encode_send_status_request(destination: &PublicKey) -> Bytes {
    let mut buf = BytesMut::with_capacity(33);
    buf.put_u8(CommandOpcode::SendStatusReq as u8);
    buf.put_slice(destination.as_bytes());
    buf.freeze()
}

#[must_use]
pub fn encode_get_channel(index: u8) -> Bytes {
    Bytes::from(vec![CommandOpcode::GetChannel as u8, index])
}

/// Builds the set-channel command (name zero-padded to 32 bytes).
///
/// # Errors
///
/// Returns `InvalidInput` if the name exceeds 32 bytes.
pub fn encode_set_channel(index: u8, name: &str, secret: &[u8; 16]) -> Result<Bytes> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput {
            reason: format!("channel name exceeds {MAX_NAME_LEN} bytes"),
        });
    }
    let mut buf = BytesMut::with_capacity(50);
    buf.put_u8(CommandOpcode::SetChannel as u8);
    buf.put_u8(index);
    buf.put_slice(name.as_bytes());
    buf.put_bytes(0, MAX_NAME_LEN - name.len());
    buf.put_slice(secret);
    Ok(buf.freeze())
}

/// Builds the self-telemetry request.
#[must_use]
pub fn encode_self_telemetry() -> Bytes {
    Bytes::from_static(&[CommandOpcode::Telemetry as u8, 0x00, 0x00, 0x00])
}

/// Builds a telemetry request addressed to a contact.
#[must_use]
pub fn encode_telemetry_request(destination: &PublicKey) -> Bytes {
    let mut buf = BytesMut::with_capacity(36);
    buf.put_u8(CommandOpcode::Telemetry as u8);
    buf.put_bytes(0, 3); // reserved
    buf.put_slice(destination.as_bytes());
    buf.freeze()
}

/// Builds a binary request addressed to a remote node.
#[must_use]
pub fn encode_binary_request(
    destination: &PublicKey,
    kind: BinaryReqKind,
    data: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(34 + data.len());
    buf.put_u8(CommandOpcode::BinaryReq as u8);
    buf.put_slice(destination.as_bytes());
    buf.put_u8(kind as u8);
    buf.put_slice(data);
    buf.freeze()
}

/// Builds the set-flood-scope command (all zeros disables scoping).
#[must_use]
pub fn encode_set_flood_scope(scope_key: &[u8; 16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(18);
    buf.put_u8(CommandOpcode::SetFloodScope as u8);
    buf.put_u8(0x00); // reserved
    buf.put_slice(scope_key);
    buf.freeze()
}

// ==================== inbound parsing ====================

/// Parses a null-terminated or fixed-length string.
fn parse_string(data: &[u8], max_len: usize) -> String {
    let len = data
        .iter()
        .take(max_len)
        .position(|&b| b == 0)
        .unwrap_or_else(|| max_len.min(data.len()));
    String::from_utf8_lossy(&data[..len]).into_owned()
}

/// Decodes a microdegree coordinate; 0 is the "unset" sentinel.
fn parse_coord(value: i32) -> Option<f64> {
    if value == 0 {
        None
    } else {
        Some(f64::from(value) / COORD_SCALE)
    }
}

fn parse_self_info(data: &[u8]) -> Option<SelfInfo> {
    // 3 + 32-byte key + 8 coords + 4 policy + 8 radio + 2
    if data.len() < 57 {
        return None;
    }
    let mut cursor = std::io::Cursor::new(data);

    let advert_type = cursor.get_u8();
    let tx_power = cursor.get_u8();
    let max_tx_power = cursor.get_u8();

    let mut pubkey = [0u8; 32];
    cursor.copy_to_slice(&mut pubkey);

    let lat_raw = cursor.get_i32_le();
    let lon_raw = cursor.get_i32_le();

    // multi-acks, advert location policy, telemetry mode, manual add
    cursor.advance(4);

    let freq_raw = cursor.get_u32_le();
    let bw_raw = cursor.get_u32_le();
    let sf = cursor.get_u8();
    let cr = cursor.get_u8();

    #[allow(clippy::cast_possible_truncation)]
    let name_start = cursor.position() as usize;
    let name = parse_string(&data[name_start..], MAX_NAME_LEN);

    Some(SelfInfo {
        advert_type,
        tx_power,
        max_tx_power,
        public_key: PublicKey::new(pubkey),
        latitude: parse_coord(lat_raw),
        longitude: parse_coord(lon_raw),
        radio: RadioConfig {
            frequency_mhz: f64::from(freq_raw) / 1000.0,
            bandwidth_khz: f64::from(bw_raw) / 1000.0,
            spreading_factor: sf,
            coding_rate: cr,
        },
        name,
    })
}

fn parse_device_info(data: &[u8]) -> Option<DeviceInfo> {
    let firmware_version = *data.first()?;

    if firmware_version >= 3 && data.len() >= 79 {
        // [max_contacts/2:1] [max_channels:1] [ble_pin:4] [build:12]
        // [model:40] [version:20]
        Some(DeviceInfo {
            firmware_version,
            max_contacts: Some(u16::from(data[1]) * 2),
            max_channels: Some(data[2]),
            model: Some(parse_string(&data[19..59], 40)),
            version: Some(parse_string(&data[59..79], 20)),
        })
    } else {
        Some(DeviceInfo {
            firmware_version,
            max_contacts: None,
            max_channels: None,
            model: None,
            version: None,
        })
    }
}

fn parse_contact(data: &[u8]) -> Option<Contact> {
    // 32 + 1 + 1 + 1 + 64 + 32 + 4 + 4 + 4 + 4
    if data.len() < 147 {
        return None;
    }
    let mut cursor = std::io::Cursor::new(data);

    let mut pubkey = [0u8; 32];
    cursor.copy_to_slice(&mut pubkey);

    let contact_type = ContactType::from_byte(cursor.get_u8());
    let flags = ContactFlags::from_byte(cursor.get_u8());
    let out_path_len = cursor.get_i8();

    let mut path = [0u8; MAX_PATH_LEN];
    cursor.copy_to_slice(&mut path);
    let hops = usize::try_from(out_path_len).unwrap_or(0).min(MAX_PATH_LEN);
    let out_path = Bytes::copy_from_slice(&path[..hops]);

    let name = parse_string(&data[99..131], MAX_NAME_LEN);

    cursor.set_position(131);
    let last_advert = cursor.get_u32_le();
    let lat_raw = cursor.get_i32_le();
    let lon_raw = cursor.get_i32_le();
    let last_modified = cursor.get_u32_le();

    Some(Contact {
        public_key: PublicKey::new(pubkey),
        contact_type,
        flags,
        out_path_len,
        out_path,
        name,
        last_advert,
        latitude: parse_coord(lat_raw),
        longitude: parse_coord(lon_raw),
        last_modified,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn parse_direct_message(data: &[u8], v3: bool) -> Option<DirectMessage> {
    let min_len = if v3 { 15 } else { 12 };
    if data.len() < min_len {
        return None;
    }
    let mut cursor = std::io::Cursor::new(data);

    let signal = if v3 {
        let snr_raw = cursor.get_i8();
        cursor.advance(2); // reserved
        Some(SignalQuality {
            snr: f32::from(snr_raw) / SNR_SCALE,
        })
    } else {
        None
    };

    let mut sender_prefix = [0u8; PUBLIC_KEY_PREFIX_LEN];
    cursor.copy_to_slice(&mut sender_prefix);

    let path_len = cursor.get_i8();
    let text_type = TextType::from_byte(cursor.get_u8());
    let timestamp = cursor.get_u32_le();

    let text_start = cursor.position() as usize;
    // signed messages carry a 4-byte signature before the text
    let (signature, text) = if text_type == TextType::Signed && data.len() > text_start + 4 {
        (
            Some(data[text_start..text_start + 4].to_vec()),
            String::from_utf8_lossy(&data[text_start + 4..]).into_owned(),
        )
    } else {
        (
            None,
            String::from_utf8_lossy(&data[text_start..]).into_owned(),
        )
    };

    Some(DirectMessage {
        sender_prefix,
        path_len,
        text_type,
        timestamp,
        signature,
        text,
        signal,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn parse_channel_message(data: &[u8], v3: bool) -> Option<ChannelMessage> {
    let min_len = if v3 { 10 } else { 7 };
    if data.len() < min_len {
        return None;
    }
    let mut cursor = std::io::Cursor::new(data);

    let signal = if v3 {
        let snr_raw = cursor.get_i8();
        cursor.advance(2); // reserved
        Some(SignalQuality {
            snr: f32::from(snr_raw) / SNR_SCALE,
        })
    } else {
        None
    };

    let channel_index = cursor.get_u8();
    let path_len = cursor.get_i8();
    let text_type = TextType::from_byte(cursor.get_u8());
    let timestamp = cursor.get_u32_le();

    let text_start = cursor.position() as usize;
    let text = String::from_utf8_lossy(&data[text_start..]).into_owned();

    Some(ChannelMessage {
        channel_index,
        path_len,
        text_type,
        timestamp,
        text,
        signal,
    })
}

fn parse_battery(data: &[u8]) -> Option<BatteryStatus> {
    if data.len() < 2 {
        return None;
    }
    let millivolts = u16::from_le_bytes([data[0], data[1]]);
    let (used_kb, total_kb) = if data.len() >= 10 {
        (
            Some(u32::from_le_bytes([data[2], data[3], data[4], data[5]])),
            Some(u32::from_le_bytes([data[6], data[7], data[8], data[9]])),
        )
    } else {
        (None, None)
    };
    Some(BatteryStatus {
        millivolts,
        used_kb,
        total_kb,
    })
}

fn parse_channel(data: &[u8]) -> Option<Channel> {
    if data.len() < 49 {
        return None;
    }
    let mut secret = [0u8; 16];
    secret.copy_from_slice(&data[33..49]);
    Some(Channel {
        index: data[0],
        name: parse_string(&data[1..33], MAX_NAME_LEN),
        secret,
    })
}

/// Parses a remote status report (the byte after the push code is
/// reserved and already stripped by the caller).
fn parse_remote_status(data: &[u8]) -> Option<RemoteStatus> {
    if data.len() < 58 {
        return None;
    }
    let mut cursor = std::io::Cursor::new(data);

    let mut pubkey_prefix = [0u8; PUBLIC_KEY_PREFIX_LEN];
    cursor.copy_to_slice(&mut pubkey_prefix);

    let battery_mv = cursor.get_u16_le();
    let tx_queue_len = cursor.get_u16_le();
    let noise_floor = cursor.get_i16_le();
    let last_rssi = cursor.get_i16_le();
    let packets_received = cursor.get_u32_le();
    let packets_sent = cursor.get_u32_le();
    cursor.advance(4); // tx airtime
    let uptime_secs = cursor.get_u32_le();
    cursor.advance(16); // flood/direct send+receive counters
    cursor.advance(2); // full-queue events
    let last_snr = f32::from(cursor.get_i16_le()) / SNR_SCALE;

    Some(RemoteStatus {
        pubkey_prefix,
        battery_mv,
        tx_queue_len,
        noise_floor,
        last_rssi,
        packets_received,
        packets_sent,
        uptime_secs,
        last_snr,
    })
}

fn prefix6(data: &[u8]) -> [u8; PUBLIC_KEY_PREFIX_LEN] {
    let mut prefix = [0u8; PUBLIC_KEY_PREFIX_LEN];
    prefix.copy_from_slice(&data[..PUBLIC_KEY_PREFIX_LEN]);
    prefix
}

fn u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// Decodes one inbound payload into a typed event.
///
/// The first byte selects the packet code; the remainder is the
/// code-specific body. Anything that fails structural parsing comes
/// back as `Unrecognized` with the raw bytes attached.
#[must_use]
pub fn decode(payload: &[u8]) -> Decoded {
    let Some(&first) = payload.first() else {
        return Decoded::Unrecognized {
            first_byte: None,
            data: Vec::new(),
        };
    };
    let Some(code) = PacketCode::from_byte(first) else {
        return Decoded::Unrecognized {
            first_byte: Some(first),
            data: payload.to_vec(),
        };
    };
    let data = &payload[1..];

    let event = match code {
        PacketCode::Ok => Some(Event::Ok),
        PacketCode::Error => Some(Event::Error {
            code: data.first().copied(),
        }),
        PacketCode::SelfInfo => parse_self_info(data).map(|i| Event::SelfInfo(Box::new(i))),
        PacketCode::DeviceInfo => parse_device_info(data).map(|i| Event::DeviceInfo(Box::new(i))),
        PacketCode::Battery => parse_battery(data).map(Event::Battery),
        PacketCode::CurrentTime => (data.len() >= 4).then(|| Event::CurrentTime(u32_le(data))),
        PacketCode::ContactStart => Some(Event::ContactListStart {
            count: if data.len() >= 4 { u32_le(data) } else { 0 },
        }),
        PacketCode::Contact => parse_contact(data).map(|c| Event::Contact(Box::new(c))),
        PacketCode::ContactEnd => Some(Event::ContactListEnd {
            last_modified: if data.len() >= 4 { u32_le(data) } else { 0 },
        }),
        PacketCode::MsgSent => (data.len() >= 9).then(|| Event::MessageSent {
            expected_ack: u32_le(&data[1..5]),
            suggested_timeout_ms: u32_le(&data[5..9]),
        }),
        PacketCode::ContactMsgRecv => {
            parse_direct_message(data, false).map(|m| Event::DirectMessage(Box::new(m)))
        }
        PacketCode::ContactMsgRecvV3 => {
            parse_direct_message(data, true).map(|m| Event::DirectMessage(Box::new(m)))
        }
        PacketCode::ChannelMsgRecv => {
            parse_channel_message(data, false).map(|m| Event::ChannelMessage(Box::new(m)))
        }
        PacketCode::ChannelMsgRecvV3 => {
            parse_channel_message(data, true).map(|m| Event::ChannelMessage(Box::new(m)))
        }
        PacketCode::NoMoreMsgs => Some(Event::NoMoreMessages),
        PacketCode::ChannelInfo => parse_channel(data).map(|c| Event::ChannelInfo(Box::new(c))),
        PacketCode::Advertisement => PublicKey::try_from_bytes(data.get(..32).unwrap_or_default())
            .map(Event::Advertisement),
        PacketCode::PushNewAdvert => {
            parse_contact(data).map(|c| Event::NewContactAdvert(Box::new(c)))
        }
        PacketCode::PathUpdate => PublicKey::try_from_bytes(data.get(..32).unwrap_or_default())
            .map(Event::PathUpdate),
        PacketCode::Ack => {
            (data.len() >= 4).then(|| Event::Ack(Acknowledgment { code: u32_le(data) }))
        }
        PacketCode::MessagesWaiting => Some(Event::MessagesWaiting),
        PacketCode::LoginSuccess => Some(Event::LoginSuccess),
        PacketCode::LoginFailed => Some(Event::LoginFailed),
        PacketCode::StatusResponse => {
            // [reserved:1] [pubkey_prefix:6] [fields...]
            data.split_first()
                .and_then(|(_, rest)| parse_remote_status(rest))
                .map(|s| Event::StatusResponse(Box::new(s)))
        }
        PacketCode::TelemetryResponse => {
            // [reserved:1] [pubkey_prefix:6] [lpp...]
            (data.len() >= 7).then(|| Event::TelemetryResponse {
                pubkey_prefix: prefix6(&data[1..7]),
                telemetry: Telemetry::decode(&data[7..]),
            })
        }
        PacketCode::BinaryResponse => {
            // [pubkey_prefix:6] [kind:1] [body...]
            (data.len() >= 7).then(|| Event::BinaryResponse {
                pubkey_prefix: prefix6(data),
                kind: BinaryReqKind::from_byte(data[6]),
                data: data[7..].to_vec(),
            })
        }
    };

    match event {
        Some(event) if code.is_push() => Decoded::Push { code, event },
        Some(event) => Decoded::Response { code, event },
        None => Decoded::Unrecognized {
            first_byte: Some(first),
            data: payload.to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_string_stops_at_nul() {
        assert_eq!(parse_string(b"hello\0world", 11), "hello");
        assert_eq!(parse_string(b"hello", 5), "hello");
        assert_eq!(parse_string(b"hello", 3), "hel");
    }

    #[test]
    fn coord_zero_is_unset() {
        assert_eq!(parse_coord(0), None);
        assert!((parse_coord(51_500_000).unwrap() - 51.5).abs() < 0.0001);
    }

    #[test]
    fn decode_empty_and_unknown_are_unrecognized() {
        assert!(matches!(
            decode(&[]),
            Decoded::Unrecognized { first_byte: None, .. }
        ));
        assert!(matches!(
            decode(&[0xFF, 0x01]),
            Decoded::Unrecognized {
                first_byte: Some(0xFF),
                ..
            }
        ));
    }

    #[test]
    fn decode_truncated_known_code_is_unrecognized() {
        // CurrentTime with only 2 of 4 time bytes
        assert!(matches!(
            decode(&[0x09, 0x01, 0x02]),
            Decoded::Unrecognized {
                first_byte: Some(0x09),
                ..
            }
        ));
    }

    #[test]
    fn decode_truncated_self_info_is_unrecognized() {
        // one byte short of the fixed-field region
        let mut payload = vec![0x05];
        payload.extend_from_slice(&[0u8; 56]);
        assert!(matches!(
            decode(&payload),
            Decoded::Unrecognized {
                first_byte: Some(0x05),
                ..
            }
        ));

        // exactly the fixed fields, empty name: parses
        let mut payload = vec![0x05];
        payload.extend_from_slice(&[0u8; 57]);
        assert!(matches!(
            decode(&payload),
            Decoded::Response {
                event: Event::SelfInfo(_),
                ..
            }
        ));
    }

    #[test]
    fn decode_current_time() {
        let mut payload = vec![0x09];
        payload.extend_from_slice(&1_234_567_890_u32.to_le_bytes());
        match decode(&payload) {
            Decoded::Response {
                code: PacketCode::CurrentTime,
                event: Event::CurrentTime(t),
            } => assert_eq!(t, 1_234_567_890),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_msg_sent() {
        let mut payload = vec![0x06, 0x00];
        payload.extend_from_slice(&0xDEAD_BEEF_u32.to_le_bytes());
        payload.extend_from_slice(&4000u32.to_le_bytes());
        match decode(&payload) {
            Decoded::Response {
                event:
                    Event::MessageSent {
                        expected_ack,
                        suggested_timeout_ms,
                    },
                ..
            } => {
                assert_eq!(expected_ack, 0xDEAD_BEEF);
                assert_eq!(suggested_timeout_ms, 4000);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_ack_is_push() {
        let mut payload = vec![0x82];
        payload.extend_from_slice(&42u32.to_le_bytes());
        match decode(&payload) {
            Decoded::Push {
                event: Event::Ack(ack),
                ..
            } => assert_eq!(ack.code, 42),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_battery() {
        let payload = [0x0C, 0xD4, 0x0D];
        match decode(&payload) {
            Decoded::Response {
                event: Event::Battery(b),
                ..
            } => {
                assert_eq!(b.millivolts, 3540);
                assert_eq!(b.used_kb, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_channel_message() {
        let mut payload = vec![0x08, 2, 0, 0];
        payload.extend_from_slice(&1_234_567_890_u32.to_le_bytes());
        payload.extend_from_slice(b"Hello");
        match decode(&payload) {
            Decoded::Response {
                event: Event::ChannelMessage(msg),
                ..
            } => {
                assert_eq!(msg.channel_index, 2);
                assert_eq!(msg.timestamp, 1_234_567_890);
                assert_eq!(msg.text, "Hello");
                assert!(msg.signal.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_direct_message_v3_carries_snr() {
        let mut payload = vec![0x10];
        payload.push(40u8); // snr raw = 10.0 dB
        payload.extend_from_slice(&[0, 0]); // reserved
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6]); // sender prefix
        payload.push(0); // path_len
        payload.push(0); // txt_type
        payload.extend_from_slice(&100u32.to_le_bytes());
        payload.extend_from_slice(b"hi");
        match decode(&payload) {
            Decoded::Response {
                event: Event::DirectMessage(msg),
                ..
            } => {
                assert_eq!(msg.sender_prefix, [1, 2, 3, 4, 5, 6]);
                assert!((msg.signal.unwrap().snr - 10.0).abs() < 0.01);
                assert_eq!(msg.text, "hi");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_binary_response_routes_by_prefix_and_kind() {
        let mut payload = vec![0x8C];
        payload.extend_from_slice(&[9, 8, 7, 6, 5, 4]);
        payload.push(0x03); // telemetry kind
        payload.extend_from_slice(&[0x01, 0x67, 0x00, 0xFA]);
        match decode(&payload) {
            Decoded::Push {
                event:
                    Event::BinaryResponse {
                        pubkey_prefix,
                        kind,
                        data,
                    },
                ..
            } => {
                assert_eq!(pubkey_prefix, [9, 8, 7, 6, 5, 4]);
                assert_eq!(kind, Some(BinaryReqKind::Telemetry));
                assert_eq!(data.len(), 4);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn update_contact_round_trips_through_parse() {
        let mut key = [0u8; 32];
        key[0] = 0xAA;
        let contact = Contact {
            public_key: PublicKey::new(key),
            contact_type: ContactType::Repeater,
            flags: ContactFlags::FAVORITE,
            out_path_len: 2,
            out_path: Bytes::from_static(&[0x11, 0x22]),
            name: "repeater-7".into(),
            last_advert: 1000,
            latitude: Some(51.5),
            longitude: Some(-0.12),
            last_modified: 2000,
        };
        let encoded = encode_update_contact(&contact);
        assert_eq!(encoded.len(), 148); // opcode + full contact record
        // strip the opcode byte and reparse as a contact record
        let parsed = parse_contact(&encoded[1..]).unwrap();
        assert_eq!(parsed.public_key, contact.public_key);
        assert_eq!(parsed.contact_type, ContactType::Repeater);
        assert_eq!(parsed.out_path.as_ref(), &[0x11, 0x22]);
        assert_eq!(parsed.name, "repeater-7");
        assert!((parsed.latitude.unwrap() - 51.5).abs() < 1e-5);
        assert_eq!(parsed.last_modified, 2000);
    }

    #[test]
    fn set_name_rejects_long_names() {
        assert!(encode_set_name(&"x".repeat(33)).is_err());
        assert!(encode_set_name("ok").is_ok());
    }

    #[test]
    fn set_radio_layout_and_validation() {
        let config = RadioConfig {
            frequency_mhz: 868.0,
            bandwidth_khz: 125.0,
            spreading_factor: 7,
            coding_rate: 5,
        };
        let bytes = encode_set_radio(&config).unwrap();
        assert_eq!(bytes[0], CommandOpcode::SetRadio as u8);
        assert_eq!(u32_le(&bytes[1..5]), 868_000);
        assert_eq!(u32_le(&bytes[5..9]), 125_000);
        assert_eq!(&bytes[9..], &[7, 5]);

        let bad = RadioConfig {
            spreading_factor: 13,
            ..config
        };
        assert!(matches!(
            encode_set_radio(&bad),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn set_coords_validates_range() {
        assert!(encode_set_coords(91.0, 0.0).is_err());
        assert!(encode_set_coords(0.0, -181.0).is_err());
        assert!(encode_set_coords(51.5, -0.12).is_ok());
    }

    #[test]
    fn send_message_layout() {
        let mut key = [0u8; 32];
        key[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        let dest = PublicKey::new(key);
        let bytes =
            encode_send_message(MessageSendType::Direct, 0, 1_703_123_456, &dest, "hey").unwrap();
        assert_eq!(bytes[0], CommandOpcode::SendMessage as u8);
        assert_eq!(bytes[1], 0x00);
        assert_eq!(bytes[2], 0);
        assert_eq!(u32_le(&bytes[3..7]), 1_703_123_456);
        assert_eq!(&bytes[7..13], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&bytes[13..], b"hey");
    }

    #[test]
    fn send_message_rejects_oversize_text() {
        let dest = PublicKey::new([0u8; 32]);
        let long = "a".repeat(MAX_TEXT_LEN + 1);
        assert!(matches!(
            encode_send_message(MessageSendType::Direct, 0, 0, &dest, &long),
            Err(Error::DataTooLarge { .. })
        ));
    }
}
