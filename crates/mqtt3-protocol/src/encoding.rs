//! Primitive wire encodings: the remaining-length variable integer and
//! the 2-byte length-prefixed UTF-8 string / binary blob.

use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Largest value a four-group variable integer can carry.
pub const VARIABLE_INT_MAX: u32 = 268_435_455;

/// Largest string or blob a 2-byte length prefix can describe.
pub const STRING_MAX: usize = 65_535;

pub fn encode_variable_int<B: BufMut>(buf: &mut B, value: u32) -> Result<()> {
    if value > VARIABLE_INT_MAX {
        return Err(MqttError::PacketTooLarge {
            size: value as usize,
            max: VARIABLE_INT_MAX as usize,
        });
    }

    let mut remaining = value;
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if remaining == 0 {
            return Ok(());
        }
    }
}

/// Decodes a variable integer from a buffer that is known to be complete.
pub fn decode_variable_int<B: Buf>(buf: &mut B) -> Result<u32> {
    let mut value = 0u32;
    let mut multiplier = 1u32;

    for _ in 0..4 {
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "Truncated variable length integer".to_string(),
            ));
        }
        let byte = buf.get_u8();
        value += u32::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }

    Err(MqttError::MalformedPacket(
        "Variable length integer exceeds 4 bytes".to_string(),
    ))
}

/// Peeks a variable integer at the start of `bytes` without consuming.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and
/// the number of bytes it occupies.
pub fn peek_variable_int(bytes: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value = 0u32;
    let mut multiplier = 1u32;

    for (i, &byte) in bytes.iter().enumerate() {
        if i == 4 {
            return Err(MqttError::MalformedPacket(
                "Variable length integer exceeds 4 bytes".to_string(),
            ));
        }
        value += u32::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }

    if bytes.len() >= 4 {
        return Err(MqttError::MalformedPacket(
            "Variable length integer exceeds 4 bytes".to_string(),
        ));
    }
    Ok(None)
}

#[must_use]
pub fn variable_int_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

pub fn encode_string<B: BufMut>(buf: &mut B, string: &str) -> Result<()> {
    encode_binary(buf, string.as_bytes())
}

pub fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    let bytes = decode_binary(buf)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| MqttError::MalformedPacket(format!("Invalid UTF-8 string: {e}")))
}

pub fn encode_binary<B: BufMut>(buf: &mut B, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| MqttError::StringTooLong(data.len()))?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

pub fn decode_binary<B: Buf>(buf: &mut B) -> Result<Bytes> {
    if buf.remaining() < 2 {
        return Err(MqttError::MalformedPacket(
            "Missing length prefix".to_string(),
        ));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(MqttError::MalformedPacket(format!(
            "Length prefix {} exceeds remaining {} bytes",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Serialized size of a length-prefixed string or blob.
#[must_use]
pub fn string_len(s: &str) -> usize {
    2 + s.len()
}
