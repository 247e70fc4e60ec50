// ABOUTME: ARMB frame header encoding/decoding — the 16-byte length-prefixed envelope
// ABOUTME: that precedes every command string and optional binary payload on the wire.

use thiserror::Error;

/// Maximum command (verb) length, in bytes. Fixed by the two lowercase hex
/// digits reserved for it in the header (`0xff`).
pub const MAX_COMMAND_LEN: usize = 0xff;

/// Maximum payload length, in bytes. Fixed by the eight lowercase hex digits
/// reserved for it in the header (`u32::MAX`).
pub const MAX_PAYLOAD_LEN: u64 = u32::MAX as u64;

/// Size, in bytes, of an ARMB header: `ARMB <MM> <DDDDDDDD>`.
pub const HEADER_LEN: usize = 16;

const PREFIX: &[u8] = b"ARMB ";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("command length {0} exceeds maximum of {MAX_COMMAND_LEN}")]
    CommandTooLong(usize),
    #[error("payload length {0} exceeds maximum of {MAX_PAYLOAD_LEN}")]
    PayloadTooLong(u64),
    #[error("header does not match the ARMB grammar")]
    Format,
}

/// A decoded ARMB header: the command and payload lengths carried by the
/// 16-byte envelope, before either body has been read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub command_len: usize,
    pub payload_len: u64,
}

impl FrameHeader {
    pub fn new(command_len: usize, payload_len: u64) -> Result<Self, CodecError> {
        if command_len > MAX_COMMAND_LEN {
            return Err(CodecError::CommandTooLong(command_len));
        }
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLong(payload_len));
        }
        Ok(FrameHeader {
            command_len,
            payload_len,
        })
    }

    /// Encode as the literal 16 ASCII bytes `ARMB <MM> <DDDDDDDD>`.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let s = format!("ARMB {:02x} {:08x}", self.command_len, self.payload_len);
        out.copy_from_slice(s.as_bytes());
        out
    }

    /// Parse a 16-byte header buffer. Any deviation from the fixed grammar —
    /// wrong prefix, wrong separators, non-hex digits — is a `Format` error;
    /// the caller treats this as fatal to the connection, never retries.
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() != HEADER_LEN {
            return Err(CodecError::Format);
        }
        if &buf[0..5] != PREFIX {
            return Err(CodecError::Format);
        }
        if buf[7] != b' ' {
            return Err(CodecError::Format);
        }

        let command_len = parse_hex(&buf[5..7]).ok_or(CodecError::Format)?;
        let payload_len = parse_hex(&buf[8..16]).ok_or(CodecError::Format)?;

        Ok(FrameHeader {
            command_len: command_len as usize,
            payload_len,
        })
    }
}

fn parse_hex(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    // Reject uppercase: the grammar mandates lowercase hex digits.
    if digits.iter().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| u64::from_str_radix(s, 16).ok())
}

/// Encode a complete frame (header ‖ command ‖ payload) into one buffer.
/// Used by tests and by anything that wants the frame as a single write.
pub fn encode_frame(command: &[u8], payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = FrameHeader::new(command.len(), payload.len() as u64)?;
    let mut out = Vec::with_capacity(HEADER_LEN + command.len() + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(command);
    out.extend_from_slice(payload);
    Ok(out)
}
