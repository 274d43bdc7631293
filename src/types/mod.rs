//! Core data types shared across the protocol and session layers.

pub mod contact;
pub mod device;
pub mod message;
pub mod telemetry;

pub use contact::{
    Contact, ContactFlags, ContactType, PublicKey, MAX_NAME_LEN, MAX_PATH_LEN,
    PUBLIC_KEY_LEN, PUBLIC_KEY_PREFIX_LEN,
};
pub use device::{BatteryStatus, Channel, DeviceInfo, RadioConfig, RemoteStatus, SelfInfo};
pub use message::{Acknowledgment, ChannelMessage, DirectMessage, SignalQuality, TextType};
pub use telemetry::{LppDataPoint, LppValue, Telemetry};
