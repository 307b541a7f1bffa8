//! Line framing for the hub connection.
//!
//! Every frame is one line: a single ASCII type digit, a body, `\n`.
//!
//! ```text
//! 0<signal json>\n
//! 1<base64(pgp-encrypt(data json))>\n
//! 2<base64(pgp-encrypt(stream json))>\n
//! ```
//!
//! Writers flush after every frame so latency is bounded by one frame.
//! Readers cap the line length; anything longer is a protocol error, not
//! an unbounded buffer.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::crypto::{self, CryptoError};
use crate::domain::packet::{DataPacket, SignalPacket, StreamPacket};

/// Maximum accepted line length. Frames carry armored keys and base64
/// ciphertext, so the usual 8 KiB line budget is doubled.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Frame type prefixes.
pub const SIGNAL_PREFIX: char = '0';
pub const DATA_PREFIX: char = '1';
pub const STREAM_PREFIX: char = '2';

/// Write half of a hub connection, shareable across relay tasks. Each
/// connection owns exactly one of these; a slow receiver stalls only the
/// tasks writing to it.
pub type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Wrap a freshly split write half in the shared, buffered handle.
pub fn shared_writer(write_half: OwnedWriteHalf) -> SharedWriter {
    Arc::new(Mutex::new(BufWriter::with_capacity(
        MAX_LINE_LEN,
        write_half,
    )))
}

/// Line-oriented reader with the protocol's length cap.
pub fn framed_lines<R: AsyncRead>(reader: R) -> FramedRead<R, LinesCodec> {
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LEN))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame prefix {0:?}")]
    UnknownPrefix(char),
    #[error("malformed packet json: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A parsed inbound line. Data and stream bodies stay encrypted here;
/// decryption needs the receiver's identity and is up to the caller.
#[derive(Debug)]
pub enum Frame {
    Signal(SignalPacket),
    Data(Vec<u8>),
    Stream(Vec<u8>),
}

/// Split one line into its frame type and body.
pub fn parse_frame(line: &str) -> Result<Frame, WireError> {
    let mut chars = line.chars();
    let prefix = chars.next().ok_or(WireError::Empty)?;
    let body = chars.as_str();

    match prefix {
        SIGNAL_PREFIX => Ok(Frame::Signal(SignalPacket::from_json(body)?)),
        DATA_PREFIX => Ok(Frame::Data(BASE64.decode(body.as_bytes())?)),
        STREAM_PREFIX => Ok(Frame::Stream(BASE64.decode(body.as_bytes())?)),
        other => Err(WireError::UnknownPrefix(other)),
    }
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Send a signal frame: plain JSON after the `0` prefix.
pub async fn send_signal<W>(writer: &mut W, packet: &SignalPacket) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let json = packet.to_json()?;
    write_line(writer, SIGNAL_PREFIX, json.as_bytes()).await
}

/// Send a data frame, encrypted to one recipient's armored key.
pub async fn send_data<W>(
    writer: &mut W,
    packet: &DataPacket,
    recipient_key: &[u8],
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let json = packet.to_json()?;
    let ciphertext = crypto::encrypt_to(json.as_bytes(), recipient_key)?;
    write_line(writer, DATA_PREFIX, BASE64.encode(ciphertext).as_bytes()).await
}

/// Send a stream frame, encrypted to one recipient's armored key.
pub async fn send_stream<W>(
    writer: &mut W,
    packet: &StreamPacket,
    recipient_key: &[u8],
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let json = packet.to_json()?;
    let ciphertext = crypto::encrypt_to(json.as_bytes(), recipient_key)?;
    write_line(writer, STREAM_PREFIX, BASE64.encode(ciphertext).as_bytes()).await
}

async fn write_line<W>(writer: &mut W, prefix: char, body: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[prefix as u8]).await?;
    writer.write_all(body).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
