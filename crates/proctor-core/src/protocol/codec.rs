//! Binary codec for encoding and decoding proctor protocol messages.
//!
//! Wire format of one frame:
//! ```text
//! [sender:str][message_type:str][token:str][arg_count:i32]([key:str][value:str])*
//! str = [len:u16][utf8 bytes:len]
//! ```
//! All multi-byte integers are big-endian.  There is no frame header or total
//! length; a reader learns the frame size by walking the fields.
//!
//! Two flavours are provided: a slice codec ([`encode_message`] /
//! [`decode_message`]) and an async stream reader/writer ([`read_message`] /
//! [`write_message`]) used by the server's per-connection tasks.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::messages::Message;

/// Largest argument count a decoder accepts before treating the frame as garbage.
pub const MAX_ARGS: usize = 4096;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream or buffer ended in the middle of a frame.
    #[error("frame truncated while reading {context}")]
    Truncated { context: &'static str },

    /// The argument count is negative or larger than [`MAX_ARGS`].
    #[error("invalid argument count: {0}")]
    InvalidArgCount(i64),

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 in {context}")]
    InvalidUtf8 { context: &'static str },

    /// A string is too long for the 2-byte length prefix.
    #[error("string of {len} bytes exceeds the {max}-byte field limit")]
    StringTooLong { len: usize, max: usize },

    /// A required field of a text payload is missing or unparsable.
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),

    /// An I/O error other than end-of-stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Slice codec ───────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into one wire frame.
///
/// # Errors
///
/// Returns [`ProtocolError::StringTooLong`] if any field exceeds 65 535 bytes.
///
/// # Examples
///
/// ```rust
/// use proctor_core::protocol::{decode_message, encode_message, Message, MessageType};
///
/// let msg = Message::new("Client1", MessageType::NextTask, "123456");
/// let bytes = encode_message(&msg).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(64);
    write_string(&mut buf, &msg.sender)?;
    write_string(&mut buf, &msg.message_type)?;
    write_string(&mut buf, &msg.token)?;
    buf.extend_from_slice(&(msg.args.len() as i32).to_be_bytes());
    for (key, value) in &msg.args {
        write_string(&mut buf, key)?;
        write_string(&mut buf, value)?;
    }
    Ok(buf)
}

/// Decodes one [`Message`] from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed so the caller can
/// advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are truncated or malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(Message, usize), ProtocolError> {
    let (sender, off) = read_string(bytes, 0, "sender")?;
    let (message_type, off) = read_string(bytes, off, "message type")?;
    let (token, off) = read_string(bytes, off, "token")?;

    if bytes.len() < off + 4 {
        return Err(ProtocolError::Truncated { context: "argument count" });
    }
    let count = i32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);
    let count = checked_arg_count(count)?;

    let mut off = off + 4;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (key, next) = read_string(bytes, off, "argument key")?;
        let (value, next) = read_string(bytes, next, "argument value")?;
        args.push((key, value));
        off = next;
    }

    Ok((
        Message {
            sender,
            message_type,
            token,
            args,
        },
        off,
    ))
}

// ── Stream codec ──────────────────────────────────────────────────────────────

/// Reads one [`Message`] from an async byte stream.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte of a
/// frame: the peer closed the connection between messages.
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] when the stream ends mid-frame and
/// other [`ProtocolError`] variants for malformed frames or I/O failures.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    // The first byte decides between "clean end" and "frame follows".
    let mut first = [0u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Ok(None);
    }
    let mut second = [0u8; 1];
    read_exact_or_truncated(reader, &mut second, "sender").await?;
    let sender_len = u16::from_be_bytes([first[0], second[0]]) as usize;
    let sender = read_string_body(reader, sender_len, "sender").await?;

    let message_type = read_stream_string(reader, "message type").await?;
    let token = read_stream_string(reader, "token").await?;

    let mut count_buf = [0u8; 4];
    read_exact_or_truncated(reader, &mut count_buf, "argument count").await?;
    let count = checked_arg_count(i32::from_be_bytes(count_buf))?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let key = read_stream_string(reader, "argument key").await?;
        let value = read_stream_string(reader, "argument value").await?;
        args.push((key, value));
    }

    Ok(Some(Message {
        sender,
        message_type,
        token,
        args,
    }))
}

/// Encodes `msg` and writes it as one frame, flushing afterwards.
///
/// # Errors
///
/// Returns [`ProtocolError`] if encoding fails or the write fails.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn checked_arg_count(count: i32) -> Result<usize, ProtocolError> {
    if count < 0 || count as usize > MAX_ARGS {
        return Err(ProtocolError::InvalidArgCount(count as i64));
    }
    Ok(count as usize)
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(ProtocolError::StringTooLong {
            len: bytes.len(),
            max: u16::MAX as usize,
        });
    }
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_string(
    buf: &[u8],
    offset: usize,
    context: &'static str,
) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::Truncated { context });
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::Truncated { context });
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|_| ProtocolError::InvalidUtf8 { context })?
        .to_string();
    Ok((s, start + len))
}

async fn read_stream_string<R>(reader: &mut R, context: &'static str) -> Result<String, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    read_exact_or_truncated(reader, &mut len_buf, context).await?;
    read_string_body(reader, u16::from_be_bytes(len_buf) as usize, context).await
}

async fn read_string_body<R>(
    reader: &mut R,
    len: usize,
    context: &'static str,
) -> Result<String, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut body = vec![0u8; len];
    read_exact_or_truncated(reader, &mut body, context).await?;
    String::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8 { context })
}

async fn read_exact_or_truncated<R>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::Truncated { context })
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
