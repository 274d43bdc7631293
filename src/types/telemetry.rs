//! Telemetry data points and the LPP sensor-payload codec.
//!
//! The wire format is a sequence of `(channel:1)(type:1)(value)` records
//! with no length prefix; the value width is fixed per type and
//! multi-byte value fields are big-endian. Decoding stops cleanly at the
//! first point where fewer than two bytes remain, the type byte is
//! unrecognized, or the buffer holds fewer bytes than the type's
//! declared size — truncated trailing data silently shortens the result
//! list. Callers must not infer "decode failed" from a short result.

use bytes::BufMut;

/// A single decoded sensor value.
///
/// Pure value with structural equality; the variant determines the
/// wire type byte and fixed width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LppValue {
    /// Digital input (0 or 1).
    DigitalInput(u8),
    /// Digital output (0 or 1).
    DigitalOutput(u8),
    /// Analog input (0.01 resolution, signed).
    AnalogInput(f32),
    /// Analog output (0.01 resolution, signed).
    AnalogOutput(f32),
    /// Illuminance in lux.
    Illuminance(u16),
    /// Presence (0 or 1).
    Presence(u8),
    /// Temperature in Celsius (0.1 resolution, signed).
    Temperature(f32),
    /// Relative humidity in % (0.5 resolution).
    Humidity(f32),
    /// Accelerometer in G (0.001 resolution per axis, signed).
    Accelerometer { x: f32, y: f32, z: f32 },
    /// Barometric pressure in hPa (0.1 resolution).
    Barometer(f32),
    /// Voltage in V (0.01 resolution).
    Voltage(f32),
    /// Current in A (0.001 resolution).
    Current(f32),
    /// Frequency in Hz.
    Frequency(u32),
    /// Percentage (0-100).
    Percentage(u8),
    /// Altitude in m (0.01 resolution, signed).
    Altitude(f32),
    /// Power in W.
    Power(u16),
    /// Distance in mm.
    Distance(u32),
    /// Energy in Wh.
    Energy(u32),
    /// Direction in degrees (0-360).
    Direction(u16),
    /// Unix timestamp.
    UnixTime(u32),
    /// Gyrometer in degrees/s (0.01 resolution per axis, signed).
    Gyrometer { x: f32, y: f32, z: f32 },
    /// Color RGB values.
    Color { r: u8, g: u8, b: u8 },
    /// GPS location (0.0001 degree / 0.01 m resolution, signed).
    Gps {
        latitude: f64,
        longitude: f64,
        altitude: f32,
    },
}

impl LppValue {
    /// Returns the wire type byte for this value.
    #[must_use]
    pub const fn type_byte(&self) -> u8 {
        match self {
            Self::DigitalInput(_) => 0,
            Self::DigitalOutput(_) => 1,
            Self::AnalogInput(_) => 2,
            Self::AnalogOutput(_) => 3,
            Self::Illuminance(_) => 101,
            Self::Presence(_) => 102,
            Self::Temperature(_) => 103,
            Self::Humidity(_) => 104,
            Self::Accelerometer { .. } => 113,
            Self::Barometer(_) => 115,
            Self::Voltage(_) => 116,
            Self::Current(_) => 117,
            Self::Frequency(_) => 118,
            Self::Percentage(_) => 120,
            Self::Altitude(_) => 121,
            Self::Power(_) => 128,
            Self::Distance(_) => 130,
            Self::Energy(_) => 131,
            Self::Direction(_) => 132,
            Self::UnixTime(_) => 133,
            Self::Gyrometer { .. } => 134,
            Self::Color { .. } => 135,
            Self::Gps { .. } => 136,
        }
    }
}

/// Fixed value width in bytes for a wire type, or `None` if the type
/// byte is unrecognized.
const fn value_size(type_byte: u8) -> Option<usize> {
    match type_byte {
        0 | 1 | 102 | 104 | 120 => Some(1),
        2 | 3 | 101 | 103 | 115..=117 | 121 | 128 | 132 => Some(2),
        135 => Some(3),
        118 | 130 | 131 | 133 => Some(4),
        113 | 134 => Some(6),
        136 => Some(9),
        _ => None,
    }
}

/// A telemetry data point: channel plus decoded value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LppDataPoint {
    /// Channel number (0-255).
    pub channel: u8,
    /// Decoded sensor value.
    pub value: LppValue,
}

/// A decoded telemetry payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    /// Data points in wire order.
    pub points: Vec<LppDataPoint>,
}

fn be_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

fn be_i16(data: &[u8]) -> i16 {
    i16::from_be_bytes([data[0], data[1]])
}

fn be_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

/// Sign-extends a 3-byte big-endian field to i32.
fn be_i24(data: &[u8]) -> i32 {
    let ext = if data[0] & 0x80 != 0 { 0xFF } else { 0x00 };
    i32::from_be_bytes([ext, data[0], data[1], data[2]])
}

/// Writes the low 24 bits of `value` big-endian (truncating overflow).
fn put_i24(buf: &mut Vec<u8>, value: i32) {
    let bytes = value.to_be_bytes();
    buf.extend_from_slice(&bytes[1..4]);
}

#[allow(clippy::cast_possible_truncation)]
fn decode_value(type_byte: u8, v: &[u8]) -> Option<LppValue> {
    let value = match type_byte {
        0 => LppValue::DigitalInput(v[0]),
        1 => LppValue::DigitalOutput(v[0]),
        2 => LppValue::AnalogInput(f32::from(be_i16(v)) / 100.0),
        3 => LppValue::AnalogOutput(f32::from(be_i16(v)) / 100.0),
        101 => LppValue::Illuminance(be_u16(v)),
        102 => LppValue::Presence(v[0]),
        103 => LppValue::Temperature(f32::from(be_i16(v)) / 10.0),
        104 => LppValue::Humidity(f32::from(v[0]) / 2.0),
        113 => LppValue::Accelerometer {
            x: f32::from(be_i16(&v[0..2])) / 1000.0,
            y: f32::from(be_i16(&v[2..4])) / 1000.0,
            z: f32::from(be_i16(&v[4..6])) / 1000.0,
        },
        115 => LppValue::Barometer(f32::from(be_u16(v)) / 10.0),
        116 => LppValue::Voltage(f32::from(be_u16(v)) / 100.0),
        117 => LppValue::Current(f32::from(be_u16(v)) / 1000.0),
        118 => LppValue::Frequency(be_u32(v)),
        120 => LppValue::Percentage(v[0]),
        121 => LppValue::Altitude(f32::from(be_i16(v)) / 100.0),
        128 => LppValue::Power(be_u16(v)),
        130 => LppValue::Distance(be_u32(v)),
        131 => LppValue::Energy(be_u32(v)),
        132 => LppValue::Direction(be_u16(v)),
        133 => LppValue::UnixTime(be_u32(v)),
        134 => LppValue::Gyrometer {
            x: f32::from(be_i16(&v[0..2])) / 100.0,
            y: f32::from(be_i16(&v[2..4])) / 100.0,
            z: f32::from(be_i16(&v[4..6])) / 100.0,
        },
        135 => LppValue::Color {
            r: v[0],
            g: v[1],
            b: v[2],
        },
        136 => LppValue::Gps {
            latitude: f64::from(be_i24(&v[0..3])) / 10000.0,
            longitude: f64::from(be_i24(&v[3..6])) / 10000.0,
            altitude: be_i24(&v[6..9]) as f32 / 100.0,
        },
        _ => return None,
    };
    Some(value)
}

/// Scales a float to its raw fixed-point representation.
#[allow(clippy::cast_possible_truncation)]
fn scaled(value: f32, scale: f32) -> i64 {
    (f64::from(value) * f64::from(scale)).round() as i64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode_value(buf: &mut Vec<u8>, value: &LppValue) {
    match *value {
        LppValue::DigitalInput(b)
        | LppValue::DigitalOutput(b)
        | LppValue::Presence(b)
        | LppValue::Percentage(b) => buf.push(b),
        LppValue::AnalogInput(f) | LppValue::AnalogOutput(f) => {
            buf.put_i16(scaled(f, 100.0) as i16);
        }
        LppValue::Illuminance(u) | LppValue::Power(u) | LppValue::Direction(u) => {
            buf.put_u16(u);
        }
        LppValue::Temperature(f) => buf.put_i16(scaled(f, 10.0) as i16),
        LppValue::Humidity(f) => buf.push(scaled(f, 2.0) as u8),
        LppValue::Accelerometer { x, y, z } => {
            buf.put_i16(scaled(x, 1000.0) as i16);
            buf.put_i16(scaled(y, 1000.0) as i16);
            buf.put_i16(scaled(z, 1000.0) as i16);
        }
        LppValue::Barometer(f) => buf.put_u16(scaled(f, 10.0) as u16),
        LppValue::Voltage(f) => buf.put_u16(scaled(f, 100.0) as u16),
        LppValue::Current(f) => buf.put_u16(scaled(f, 1000.0) as u16),
        LppValue::Frequency(u) | LppValue::Distance(u) | LppValue::Energy(u) => {
            buf.put_u32(u);
        }
        LppValue::Altitude(f) => buf.put_i16(scaled(f, 100.0) as i16),
        LppValue::UnixTime(u) => buf.put_u32(u),
        LppValue::Gyrometer { x, y, z } => {
            buf.put_i16(scaled(x, 100.0) as i16);
            buf.put_i16(scaled(y, 100.0) as i16);
            buf.put_i16(scaled(z, 100.0) as i16);
        }
        LppValue::Color { r, g, b } => {
            buf.push(r);
            buf.push(g);
            buf.push(b);
        }
        LppValue::Gps {
            latitude,
            longitude,
            altitude,
        } => {
            put_i24(buf, ((latitude * 10000.0).round()) as i32);
            put_i24(buf, ((longitude * 10000.0).round()) as i32);
            put_i24(buf, scaled(altitude, 100.0) as i32);
        }
    }
}

impl Telemetry {
    /// Creates an empty telemetry collection.
    #[must_use]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Decodes an LPP payload.
    ///
    /// Total: never errors. Decoding stops at the first malformed
    /// record (unknown type byte or short value) and returns every
    /// record parsed before it.
    #[must_use]
    pub fn decode(data: &[u8]) -> Self {
        let mut points = Vec::new();
        let mut pos = 0;

        while pos + 2 <= data.len() {
            let channel = data[pos];
            let type_byte = data[pos + 1];
            pos += 2;

            let Some(size) = value_size(type_byte) else {
                break;
            };
            if pos + size > data.len() {
                break;
            }

            // value_size guarantees the slice length decode_value indexes
            let Some(value) = decode_value(type_byte, &data[pos..pos + size]) else {
                break;
            };
            points.push(LppDataPoint { channel, value });
            pos += size;
        }

        Self { points }
    }

    /// Encodes data points back to the wire format.
    ///
    /// Structural inverse of [`Telemetry::decode`]: inverse scale per
    /// type, narrowed to the fixed wire width with truncating
    /// (non-saturating) overflow.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for point in &self.points {
            buf.push(point.channel);
            buf.push(point.value.type_byte());
            encode_value(&mut buf, &point.value);
        }
        buf
    }

    /// Gets the first temperature reading.
    #[must_use]
    pub fn temperature(&self) -> Option<f32> {
        self.points.iter().find_map(|p| match p.value {
            LppValue::Temperature(t) => Some(t),
            _ => None,
        })
    }

    /// Gets the first humidity reading.
    #[must_use]
    pub fn humidity(&self) -> Option<f32> {
        self.points.iter().find_map(|p| match p.value {
            LppValue::Humidity(h) => Some(h),
            _ => None,
        })
    }

    /// Gets the first voltage reading.
    #[must_use]
    pub fn voltage(&self) -> Option<f32> {
        self.points.iter().find_map(|p| match p.value {
            LppValue::Voltage(v) => Some(v),
            _ => None,
        })
    }

    /// Gets the first GPS reading as (latitude, longitude, altitude).
    #[must_use]
    pub fn gps(&self) -> Option<(f64, f64, f32)> {
        self.points.iter().find_map(|p| match p.value {
            LppValue::Gps {
                latitude,
                longitude,
                altitude,
            } => Some((latitude, longitude, altitude)),
            _ => None,
        })
    }
}
