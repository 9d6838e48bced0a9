//! Wire framing: `[4-byte big-endian length][b'P'][b'Y'][length bytes of JSON]`.
//!
//! No trailing delimiter — a reader consumes exactly `6 + length` bytes
//! per frame. There is no resync strategy for a corrupt length: once a
//! frame's length prefix is wrong, the stream is unrecoverable and the
//! connection must be torn down (spec.md §8.4).

use crate::error::{CoreError, CoreResult};
use crate::protocol::message::ProtocolMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAGIC: [u8; 2] = *b"PY";
pub const HEADER_LEN: usize = 6;

/// Encode a single message into a complete wire frame.
pub fn encode_frame(message: &ProtocolMessage) -> Vec<u8> {
    let json = serde_json::to_vec(message).expect("ProtocolMessage serialization is infallible");
    let mut buf = Vec::with_capacity(HEADER_LEN + json.len());
    buf.extend_from_slice(&(json.len() as u32).to_be_bytes());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&json);
    buf
}

/// Write one frame to an async writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &ProtocolMessage) -> CoreResult<()> {
    let frame = encode_frame(message);
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read exactly one frame from an async reader: header first, then the
/// JSON body, looping on short reads as TCP requires. A bad magic or an
/// unparseable body is a [`CoreError::Decode`] — callers must not retry
/// past this point on the same connection; they should close it.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> CoreResult<ProtocolMessage> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if header[4..6] != MAGIC {
        return Err(CoreError::Decode(format!(
            "bad magic bytes {:?}, expected {:?}",
            &header[4..6],
            MAGIC
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body).map_err(|e| CoreError::Decode(format!("invalid JSON body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::MessageBuilder;

    #[tokio::test]
    async fn round_trip_every_message_type() {
        let mut b = MessageBuilder::new();
        let messages = vec![
            b.mouse(0.5, 0.5, 1.0, 2.0, "move", false, Some("server".into()), Some("left".into()), None),
            b.keyboard("enter", "press", None, None),
            b.clipboard("hello", "text", Some("server".into()), None),
            b.command("cross_screen", Default::default(), Some("server".into()), Some("left".into())),
            b.screen("guard", Default::default(), None, None),
            b.exchange(Some("laptop"), Some("1920x1080"), Some("left"), Default::default(), true, false, vec![1, 4], Some("left".into()), Some("server".into())),
            b.heartbeat(Some("server".into()), None),
        ];

        for m in messages {
            let frame = encode_frame(&m);
            let mut cursor = std::io::Cursor::new(frame);
            let decoded = read_frame(&mut cursor).await.expect("decode");
            assert_eq!(decoded.message_type, m.message_type);
            assert_eq!(decoded.sequence_id, m.sequence_id);
            assert_eq!(decoded.payload, m.payload);
            assert_eq!(decoded.source, m.source);
            assert_eq!(decoded.target, m.target);
        }
    }

    #[tokio::test]
    async fn bad_magic_is_a_decode_error_and_does_not_resync() {
        let mut b = MessageBuilder::new();
        let m = b.heartbeat(None, None);
        let mut frame = encode_frame(&m);
        frame[4] = b'X'; // corrupt magic
        let mut cursor = std::io::Cursor::new(frame);
        let first = read_frame(&mut cursor).await;
        assert!(first.is_err());
        // No resync is defined: a second read on the same stream state
        // continues to fail rather than silently skipping ahead.
        let second = read_frame(&mut cursor).await;
        assert!(second.is_err());
    }
}
