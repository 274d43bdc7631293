//! Contact data structures.

use bytes::Bytes;

/// Length of a public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of a public key prefix used in message addressing.
pub const PUBLIC_KEY_PREFIX_LEN: usize = 6;

/// Maximum routing path length in bytes.
pub const MAX_PATH_LEN: usize = 64;

/// Maximum name length in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// A 32-byte public key identifying a contact or device.
///
/// The key is the immutable identity of a contact; the hex id is
/// always derived from it and never settable on its own.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Creates a public key from a 32-byte array.
    #[must_use]
    pub const fn new(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Tries to create a public key from a byte slice.
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    #[must_use]
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; PUBLIC_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Returns the 6-byte prefix used in message addressing.
    #[must_use]
    pub fn prefix(&self) -> [u8; PUBLIC_KEY_PREFIX_LEN] {
        let mut prefix = [0u8; PUBLIC_KEY_PREFIX_LEN];
        prefix.copy_from_slice(&self.0[..PUBLIC_KEY_PREFIX_LEN]);
        prefix
    }

    /// Returns true if the key starts with the supplied prefix.
    ///
    /// Compares exactly `prefix.len()` bytes against the full key.
    #[must_use]
    pub fn matches_prefix(&self, prefix: &[u8]) -> bool {
        prefix.len() <= PUBLIC_KEY_LEN && self.0.starts_with(prefix)
    }

    /// Returns the key as a byte slice.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the derived contact id: lowercase hex of the full key.
    #[must_use]
    pub fn id(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a public key from a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::try_from_bytes(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", &self.id()[..12])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Contact flags bitset: favorite plus three telemetry permissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactFlags(u8);

impl ContactFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Contact is a favorite.
    pub const FAVORITE: Self = Self(1 << 0);

    /// Contact may read base telemetry.
    pub const TELEMETRY_BASE: Self = Self(1 << 1);

    /// Contact may read location telemetry.
    pub const TELEMETRY_LOCATION: Self = Self(1 << 2);

    /// Contact may read environment telemetry.
    pub const TELEMETRY_ENVIRONMENT: Self = Self(1 << 3);

    /// Creates flags from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks if a flag is set.
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    /// Returns a copy with the given flag set or cleared.
    #[must_use]
    pub const fn with(self, flag: Self, set: bool) -> Self {
        if set {
            Self(self.0 | flag.0)
        } else {
            Self(self.0 & !flag.0)
        }
    }
}

/// Contact type reported in advertisements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ContactType {
    /// Chat node (a person).
    #[default]
    Chat = 1,
    /// Repeater node.
    Repeater = 2,
    /// Room/chat server.
    Room = 3,
}

impl ContactType {
    /// Parses a contact type from a byte, defaulting to chat.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            2 => Self::Repeater,
            3 => Self::Room,
            _ => Self::Chat,
        }
    }
}

/// A known peer on the mesh.
#[derive(Debug, Clone)]
pub struct Contact {
    /// The contact's public key (immutable identity).
    pub public_key: PublicKey,
    /// Contact type.
    pub contact_type: ContactType,
    /// Flags bitset.
    pub flags: ContactFlags,
    /// Outbound path length (-1 means flood routing).
    pub out_path_len: i8,
    /// Outbound path hop bytes.
    pub out_path: Bytes,
    /// Advertised name.
    pub name: String,
    /// Last advertisement timestamp (Unix seconds).
    pub last_advert: u32,
    /// Advertised latitude, if any.
    pub latitude: Option<f64>,
    /// Advertised longitude, if any.
    pub longitude: Option<f64>,
    /// Last modification timestamp (Unix seconds).
    pub last_modified: u32,
}

impl Contact {
    /// Returns the derived contact id (lowercase hex of the key).
    #[must_use]
    pub fn id(&self) -> String {
        self.public_key.id()
    }

    /// Returns true if this contact uses flood routing.
    #[must_use]
    pub const fn is_flood(&self) -> bool {
        self.out_path_len < 0
    }
}
