//! Length-prefixed framed codec
//!
//! Wire frame = 4-byte big-endian length, followed by that many bytes of
//! payload. Plaintext frames carry UTF-8 JSON; secure frames carry
//! `nonce(12) || aes_gcm(ciphertext||tag)` produced by [`parlor_crypto`]. The
//! two read/write pairs below are kept separate rather than unified behind a
//! single "are we secure yet" flag, mirroring the state machine's own
//! UNAUTH→AUTH transition: a reader holding a session key can only ever
//! reach for `read_secure`.

use crate::{ProtocolError, Result};
use parlor_crypto::symmetric::{open_frame, seal_frame};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum accepted frame length, guarding against a malicious or corrupt
/// length prefix forcing an unbounded allocation.
pub const MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::InvalidMessage(format!(
            "frame length {len} exceeds maximum {MAX_FRAME_LEN}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::EncodingError("frame payload too large".into()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Reads one plaintext JSON frame and deserializes it as `T`.
pub async fn read_plain<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(reader).await?;
    serde_json::from_slice(&payload)
        .map_err(|e| ProtocolError::DecodingError(format!("invalid JSON frame: {e}")))
}

/// Reads one plaintext frame as a raw [`serde_json::Value`], for callers that
/// need to inspect the envelope before deciding how to parse it further.
pub async fn read_plain_value<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<serde_json::Value> {
    read_plain(reader).await
}

/// Serializes `value` as JSON and writes it as one plaintext frame.
pub async fn write_plain<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)
        .map_err(|e| ProtocolError::EncodingError(format!("failed to serialize frame: {e}")))?;
    write_frame(writer, &payload).await
}

/// Reads and decrypts one AES-GCM secure frame, then deserializes the
/// resulting JSON as `T`. An AEAD verification failure is fatal for the
/// connection (§4.3, §7): propagated as [`ProtocolError::DecodingError`], not
/// retried.
pub async fn read_secure<R, T>(reader: &mut R, key: &[u8; 32]) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let frame = read_frame(reader).await?;
    let plaintext = open_frame(key, &frame)
        .map_err(|e| ProtocolError::DecodingError(format!("AEAD verification failed: {e}")))?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| ProtocolError::DecodingError(format!("invalid JSON in secure frame: {e}")))
}

/// Reads and decrypts one secure frame as a raw [`serde_json::Value`].
pub async fn read_secure_value<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    key: &[u8; 32],
) -> Result<serde_json::Value> {
    read_secure(reader, key).await
}

/// Serializes `value` as JSON, encrypts it with `key`, and writes it as one
/// secure frame.
pub async fn write_secure<W, T>(writer: &mut W, key: &[u8; 32], value: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let plaintext = serde_json::to_vec(value)
        .map_err(|e| ProtocolError::EncodingError(format!("failed to serialize frame: {e}")))?;
    let frame = seal_frame(key, &plaintext)
        .map_err(|e| ProtocolError::EncodingError(format!("encryption failed: {e}")))?;
    write_frame(writer, &frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_plain_round_trip() {
        let mut buf = Vec::new();
        write_plain(&mut buf, &json!({"hello": "world"})).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let value: serde_json::Value = read_plain(&mut cursor).await.unwrap();
        assert_eq!(value["hello"], "world");
    }

    #[tokio::test]
    async fn test_secure_round_trip() {
        let key = [7u8; 32];
        let mut buf = Vec::new();
        write_secure(&mut buf, &key, &json!({"type": "ping"})).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let value: serde_json::Value = read_secure(&mut cursor, &key).await.unwrap();
        assert_eq!(value["type"], "ping");
    }

    #[tokio::test]
    async fn test_secure_read_rejects_wrong_key() {
        let mut buf = Vec::new();
        write_secure(&mut buf, &[1u8; 32], &json!({"a": 1})).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let result: Result<serde_json::Value> = read_secure(&mut cursor, &[2u8; 32]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_plain_rejects_oversize_length_prefix() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let result: Result<serde_json::Value> = read_plain(&mut cursor).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_short_frame_is_fatal() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0]);
        let result: Result<serde_json::Value> = read_plain(&mut cursor).await;
        assert!(result.is_err());
    }
}
