//! Device information types.

use crate::types::contact::PublicKey;

/// Radio configuration parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioConfig {
    /// Frequency in MHz.
    pub frequency_mhz: f64,
    /// Bandwidth in kHz.
    pub bandwidth_khz: f64,
    /// Spreading factor (6-12).
    pub spreading_factor: u8,
    /// Coding rate (5-8, representing 4/5 to 4/8).
    pub coding_rate: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 868.0,
            bandwidth_khz: 125.0,
            spreading_factor: 7,
            coding_rate: 5,
        }
    }
}

/// Self device information returned after `AppStart`.
#[derive(Debug, Clone)]
pub struct SelfInfo {
    /// Advertisement type.
    pub advert_type: u8,
    /// Current TX power (dBm).
    pub tx_power: u8,
    /// Maximum TX power (dBm).
    pub max_tx_power: u8,
    /// Device public key.
    pub public_key: PublicKey,
    /// Device latitude.
    pub latitude: Option<f64>,
    /// Device longitude.
    pub longitude: Option<f64>,
    /// Radio configuration.
    pub radio: RadioConfig,
    /// Device name.
    pub name: String,
}

/// Device information returned by `DeviceQuery`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Firmware version.
    pub firmware_version: u8,
    /// Maximum contacts (if firmware >= 3).
    pub max_contacts: Option<u16>,
    /// Maximum channels (if firmware >= 3).
    pub max_channels: Option<u8>,
    /// Device model (if firmware >= 3).
    pub model: Option<String>,
    /// Version string (if firmware >= 3).
    pub version: Option<String>,
}

/// Battery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    /// Battery voltage in millivolts.
    pub millivolts: u16,
    /// Used storage in KB, if available.
    pub used_kb: Option<u32>,
    /// Total storage in KB, if available.
    pub total_kb: Option<u32>,
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel index (0-based).
    pub index: u8,
    /// Channel name (up to 32 bytes).
    pub name: String,
    /// Channel secret (16 bytes).
    pub secret: [u8; 16],
}

/// Status reported by a remote node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteStatus {
    /// 6-byte public key prefix of the reporting node.
    pub pubkey_prefix: [u8; 6],
    /// Battery voltage in millivolts.
    pub battery_mv: u16,
    /// Transmit queue length.
    pub tx_queue_len: u16,
    /// Noise floor (dBm).
    pub noise_floor: i16,
    /// Last RSSI (dBm).
    pub last_rssi: i16,
    /// Packets received.
    pub packets_received: u32,
    /// Packets sent.
    pub packets_sent: u32,
    /// Uptime in seconds.
    pub uptime_secs: u32,
    /// Last SNR in dB.
    pub last_snr: f32,
}
