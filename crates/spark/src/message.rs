//! The wire envelope and control-channel message set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request token: 16 bytes, nil for untracked messages.
pub type Token = uuid::Uuid;

/// The fixed 22-byte envelope carried by every spark message.
///
/// Layout: `u32 LE` total size (envelope included), one flags byte
/// (bit 0 = response, bits 1-3 = payload alignment shift), the channel
/// id, then the 16 token bytes. This layout is interoperability
/// surface and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub size: u32,
    pub response: bool,
    pub alignment: u8,
    pub channel: u8,
    pub token: Token,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("envelope truncated: {0} bytes")]
    Truncated(usize),
    #[error("message size {0} is smaller than the envelope")]
    BadSize(u32),
}

impl MessageHeader {
    pub const WIRE_SIZE: usize = 22;

    const RESPONSE_BIT: u8 = 0b0000_0001;
    const ALIGNMENT_MASK: u8 = 0b0000_1110;

    pub fn new(channel: u8, token: Token, response: bool, payload_len: usize) -> Self {
        Self {
            size: (Self::WIRE_SIZE + payload_len) as u32,
            response,
            alignment: 0,
            channel,
            token,
        }
    }

    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        let flags = (if self.response { Self::RESPONSE_BIT } else { 0 })
            | ((self.alignment << 1) & Self::ALIGNMENT_MASK);

        buffer.extend_from_slice(&self.size.to_le_bytes());
        buffer.push(flags);
        buffer.push(self.channel);
        buffer.extend_from_slice(self.token.as_bytes());
    }

    pub fn read_from(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::WIRE_SIZE {
            return Err(HeaderError::Truncated(data.len()));
        }

        let size = u32::from_le_bytes(data[0..4].try_into().expect("sized slice"));

        if (size as usize) < Self::WIRE_SIZE {
            return Err(HeaderError::BadSize(size));
        }

        let flags = data[4];
        let token_bytes: [u8; 16] = data[6..22].try_into().expect("sized slice");

        Ok(Self {
            size,
            response: flags & Self::RESPONSE_BIT != 0,
            alignment: (flags & Self::ALIGNMENT_MASK) >> 1,
            channel: data[5],
            token: Token::from_bytes(token_bytes),
        })
    }
}

/// Messages exchanged on the reserved control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// One-shot banner exchange immediately after connecting.
    Hello { banner: String },
    OpenChannel {
        id: u8,
        service: String,
    },
    OpenChannelResponse {
        result: OpenResult,
        requested_id: u8,
        actual_id: u8,
    },
    CloseChannel {
        channel: u8,
    },
    Ping {
        sequence: u64,
    },
    Pong {
        sequence: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenResult {
    Ok,
    Error,
}

#[cfg(test)]
mod test {
    use super::{MessageHeader, Token};

    #[test]
    pub fn envelope_layout() {
        let token = Token::from_bytes([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
            0x0E, 0x0F,
        ]);

        let header = MessageHeader {
            size: 0x0102_0304,
            response: true,
            alignment: 3,
            channel: 7,
            token,
        };

        let mut buffer = Vec::new();
        header.write_to(&mut buffer);

        assert_eq!(buffer.len(), MessageHeader::WIRE_SIZE);
        // size is little-endian
        assert_eq!(&buffer[0..4], &[0x04, 0x03, 0x02, 0x01]);
        // flags: response bit plus alignment shift 3 in bits 1-3
        assert_eq!(buffer[4], 0b0000_0111);
        assert_eq!(buffer[5], 7);
        assert_eq!(&buffer[6..22], token.as_bytes());
    }

    #[test]
    pub fn envelope_roundtrip() {
        let header = MessageHeader::new(42, Token::new_v4(), false, 100);
        let mut buffer = Vec::new();
        header.write_to(&mut buffer);

        let parsed = MessageHeader::read_from(&buffer).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.size as usize, MessageHeader::WIRE_SIZE + 100);
    }

    #[test]
    pub fn undersized_size_field_rejected() {
        let mut buffer = Vec::new();
        MessageHeader::new(1, Token::nil(), false, 0).write_to(&mut buffer);
        buffer[0] = 2; // size 2 < envelope size
        buffer[1] = 0;
        buffer[2] = 0;
        buffer[3] = 0;
        assert!(MessageHeader::read_from(&buffer).is_err());
    }
}
