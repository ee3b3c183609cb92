//! Gateway wire framing.
//!
//! Both directions use a four-byte header: a big-endian u16 size
//! covering the opcode and payload, then a little-endian u16 opcode.
//! After authentication the header passes through the obfuscator in
//! both directions; payloads are never obfuscated. The cipher state is
//! position-dependent, so the obfuscator advances over exactly those
//! four bytes per message on each side.

use std::sync::Mutex;

use ebonhold_protocol::{
    obfuscator::Obfuscator,
    world::{OpCode, HEADER_SIZE},
    MAX_MESSAGE_SIZE,
};
use num_enum::TryFromPrimitiveError;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

pub mod client;
pub mod server;

pub use client::{Addon, AuthSession, ClientPacket};
pub use server::ServerPacket;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("malformed frame size: {0}")]
    BadSize(u16),

    #[error("error while reading packet: {0}")]
    IoRead(#[from] std::io::Error),

    #[error("opcode is invalid: {0}")]
    InvalidOpcode(#[from] TryFromPrimitiveError<OpCode>),
}

/// Read one frame, decrypting the header when the session cipher is
/// armed. A header split across TCP segments reassembles here.
pub async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    crypto: &Mutex<Option<Obfuscator>>,
) -> Result<(OpCode, Vec<u8>), FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;

    {
        let mut crypto = crypto.lock().expect("crypto lock poisoned");
        if let Some(crypto) = crypto.as_mut() {
            crypto.decrypt(&mut header);
        }
    }

    let size = u16::from_be_bytes([header[0], header[1]]);
    let opcode = u16::from_le_bytes([header[2], header[3]]);

    // size covers the opcode and payload
    if (size as usize) < 2 || size as usize > MAX_MESSAGE_SIZE {
        return Err(FrameError::BadSize(size));
    }

    let mut payload = vec![0u8; size as usize - 2];
    stream.read_exact(&mut payload).await?;

    let opcode = OpCode::try_from(opcode)?;
    trace!("read {:?} with {} payload byte(s)", opcode, payload.len());

    Ok((opcode, payload))
}

/// Frame a payload under an opcode, encrypting the header when the
/// session cipher is armed.
pub fn write_frame(
    opcode: OpCode,
    payload: &[u8],
    crypto: &Mutex<Option<Obfuscator>>,
) -> Vec<u8> {
    let size = (payload.len() + 2) as u16;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(&u16::from(opcode).to_le_bytes());

    {
        let mut crypto = crypto.lock().expect("crypto lock poisoned");
        if let Some(crypto) = crypto.as_mut() {
            crypto.encrypt(&mut frame[..HEADER_SIZE]);
        }
    }

    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use ebonhold_protocol::{obfuscator::Obfuscator, world::OpCode};

    use super::{read_frame, write_frame};

    #[tokio::test]
    async fn plaintext_roundtrip() {
        let crypto = Mutex::new(None);
        let frame = write_frame(OpCode::CmsgPing, &[1, 2, 3, 4], &crypto);
        assert_eq!(&frame[..4], &[0x00, 0x06, 0xDC, 0x01]);

        let mut cursor = std::io::Cursor::new(frame);
        let (opcode, payload) = read_frame(&mut cursor, &crypto).await.unwrap();
        assert_eq!(opcode, OpCode::CmsgPing);
        assert_eq!(payload, vec![1, 2, 3, 4]);
    }

    /// Headers (and only headers) are obfuscated once the cipher is
    /// armed; consecutive messages keep the rolling state aligned.
    #[tokio::test]
    async fn obfuscated_roundtrip() {
        let key: Vec<u8> = (0..40).collect();
        let sender = Mutex::new(Some(Obfuscator::new(&key)));
        let receiver = Mutex::new(Some(Obfuscator::new(&key)));

        let mut stream = Vec::new();
        for payload in [&[1u8, 2][..], &[3, 4, 5][..]] {
            stream.extend_from_slice(&write_frame(OpCode::CmsgPing, payload, &sender));
        }

        // the payload bytes are on the wire in the clear
        assert_eq!(&stream[4..6], &[1, 2]);

        let mut cursor = std::io::Cursor::new(stream);
        let (opcode, payload) = read_frame(&mut cursor, &receiver).await.unwrap();
        assert_eq!((opcode, payload), (OpCode::CmsgPing, vec![1, 2]));
        let (opcode, payload) = read_frame(&mut cursor, &receiver).await.unwrap();
        assert_eq!((opcode, payload), (OpCode::CmsgPing, vec![3, 4, 5]));
    }

    #[tokio::test]
    async fn garbage_header_rejected() {
        let crypto = Mutex::new(None);
        // size zero can't cover an opcode
        let mut cursor = std::io::Cursor::new(vec![0x00, 0x00, 0x00, 0x00, 0xFF]);
        assert!(read_frame(&mut cursor, &crypto).await.is_err());
    }
}
