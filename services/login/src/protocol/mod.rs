//! Framing for the login protocol: a big-endian u16 size covering the
//! opcode and payload, a one-byte opcode, then the payload.

use ebonhold_protocol::{auth::AuthCommand, MAX_MESSAGE_SIZE};
use num_enum::TryFromPrimitiveError;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use self::packets::{ClientMessage, PacketError};

pub mod packets;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("could not parse message: {0}")]
    MessageParse(#[from] PacketError),

    #[error("malformed frame size: {0}")]
    BadSize(u16),

    #[error("error while reading packet: {0}")]
    IoRead(#[from] std::io::Error),

    #[error("command is invalid: {0}")]
    InvalidCommand(#[from] TryFromPrimitiveError<AuthCommand>),
}

/// Read one framed message. Partial frames are reassembled: the size
/// prefix and payload are awaited separately, so a header split across
/// segments parses once the rest arrives.
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<ClientMessage, FrameError> {
    let mut size_bytes = [0u8; 2];
    stream.read_exact(&mut size_bytes).await?;
    let size = u16::from_be_bytes(size_bytes);

    if size == 0 || size as usize > MAX_MESSAGE_SIZE {
        return Err(FrameError::BadSize(size));
    }

    let mut frame = vec![0u8; size as usize];
    stream.read_exact(&mut frame).await?;

    let command = AuthCommand::try_from(frame[0])?;
    let payload = &frame[1..];
    trace!("read {:?} with {} payload byte(s)", command, payload.len());

    Ok(ClientMessage::read(command, payload)?)
}

/// Frame a payload under an opcode: size covers the opcode byte plus
/// the payload.
pub fn write_frame(opcode: AuthCommand, payload: &[u8]) -> Vec<u8> {
    let size = (payload.len() + 1) as u16;
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.extend_from_slice(&size.to_be_bytes());
    frame.push(opcode.into());
    frame.extend_from_slice(payload);
    frame
}
