//! Portable binary payload codec.
//!
//! Frame payloads use a fixed, host-independent layout: scalars are
//! little-endian, strings are a `u32` length followed by UTF-8 bytes,
//! sequences are a `u64` length followed by elements, optionals are a one
//! byte presence tag, and enum-like values are a one byte discriminant.
//! Trailing bytes (frame padding) are ignored by decoders.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload truncated: wanted {wanted} more bytes, {remaining} left")]
    Truncated { wanted: usize, remaining: usize },

    #[error("string field is not valid UTF-8")]
    BadUtf8,

    #[error("invalid {what} discriminant: {value}")]
    BadDiscriminant { what: &'static str, value: u8 },

    #[error("declared length {0} exceeds remaining payload")]
    BadLength(u64),
}

// ── Checked reader ────────────────────────────────────────────────────────────

/// Cursor over a payload slice with length-checked reads.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated {
                wanted: n,
                remaining: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }
}

macro_rules! reader_scalar {
    ($name:ident, $ty:ty) => {
        impl Reader<'_> {
            pub fn $name(&mut self) -> Result<$ty, DecodeError> {
                let bytes = self.take(std::mem::size_of::<$ty>())?;
                Ok(<$ty>::from_le_bytes(bytes.try_into().unwrap()))
            }
        }
    };
}

reader_scalar!(u16, u16);
reader_scalar!(u32, u32);
reader_scalar!(u64, u64);
reader_scalar!(i32, i32);
reader_scalar!(f32, f32);
reader_scalar!(f64, f64);

// ── Encode / decode traits ────────────────────────────────────────────────────

pub trait WireEncode {
    fn encode(&self, out: &mut Vec<u8>);
}

pub trait WireDecode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;
}

/// Encode a message into a fresh payload buffer.
pub fn encode_payload<T: WireEncode>(msg: &T) -> Vec<u8> {
    let mut out = Vec::new();
    msg.encode(&mut out);
    out
}

/// Decode a message from a payload, ignoring trailing frame padding.
pub fn decode_payload<T: WireDecode>(payload: &[u8]) -> Result<T, DecodeError> {
    let mut r = Reader::new(payload);
    T::decode(&mut r)
}

// ── Scalar impls ──────────────────────────────────────────────────────────────

macro_rules! wire_scalar {
    ($ty:ty, $read:ident) => {
        impl WireEncode for $ty {
            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
        impl WireDecode for $ty {
            fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                r.$read()
            }
        }
    };
}

wire_scalar!(u16, u16);
wire_scalar!(u32, u32);
wire_scalar!(u64, u64);
wire_scalar!(i32, i32);
wire_scalar!(f32, f32);
wire_scalar!(f64, f64);

impl WireEncode for u8 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

impl WireDecode for u8 {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.u8()
    }
}

impl WireEncode for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl WireDecode for bool {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(DecodeError::BadDiscriminant { what: "bool", value }),
        }
    }
}

// ── Compound impls ────────────────────────────────────────────────────────────

impl WireEncode for String {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.len() as u32).encode(out);
        out.extend_from_slice(self.as_bytes());
    }
}

impl WireDecode for String {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let len = r.u32()? as usize;
        let bytes = r.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::BadUtf8)
    }
}

impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.len() as u64).encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let len = r.u64()?;
        // Every element is at least one byte; anything longer is corrupt.
        if len > r.remaining() as u64 {
            return Err(DecodeError::BadLength(len));
        }
        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            items.push(T::decode(r)?);
        }
        Ok(items)
    }
}

impl<T: WireEncode> WireEncode for Option<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Some(value) => {
                out.push(1);
                value.encode(out);
            }
            None => out.push(0),
        }
    }
}

impl<T: WireDecode> WireDecode for Option<T> {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(r)?)),
            value => Err(DecodeError::BadDiscriminant {
                what: "option",
                value,
            }),
        }
    }
}

/// UUIDs travel as their 16 raw bytes, no length prefix.
impl WireEncode for Uuid {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl WireDecode for Uuid {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let bytes = r.take(16)?;
        Ok(Uuid::from_bytes(bytes.try_into().unwrap()))
    }
}

/// Fixed 32-byte blobs (auth challenges) travel raw, no length prefix.
impl WireEncode for [u8; 32] {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl WireDecode for [u8; 32] {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let bytes = r.take(32)?;
        Ok(bytes.try_into().unwrap())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
