//! Length-prefixed framing.
//!
//! A frame is a 4-byte little-endian unsigned length `N` followed by exactly `N` payload bytes. Readers always consume
//! the full declared length, so a stream is never left in the middle of a frame, even when the payload is about to be
//! thrown away.

use crate::errors::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FRAME_HEADER_LEN: usize = 4;

/// Serialise `payload` into a single frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = frame_len(payload)?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Extract one frame from the front of `buf`.
///
/// Returns the payload and the total number of bytes consumed (header included).
pub fn decode_frame(buf: &[u8]) -> Result<(Vec<u8>, usize), FrameError> {
    let Some((header, rest)) = buf.split_first_chunk::<FRAME_HEADER_LEN>() else {
        return Err(FrameError::Truncated { expected: FRAME_HEADER_LEN, actual: buf.len() });
    };
    let len = u32::from_le_bytes(*header) as usize;
    match rest.get(..len) {
        Some(payload) => Ok((payload.to_vec(), FRAME_HEADER_LEN + len)),
        None => Err(FrameError::Truncated { expected: len, actual: rest.len() }),
    }
}

/// Read exactly one frame from the stream.
///
/// Returns `Ok(None)` if the stream ended cleanly on a frame boundary. An end of stream anywhere inside a frame is
/// reported as [`FrameError::Truncated`].
pub async fn read_frame<R>(stream: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let n = read_full(stream, &mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated { expected: FRAME_HEADER_LEN, actual: n });
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }
    let mut payload = vec![0u8; len];
    let n = read_full(stream, &mut payload).await?;
    if n < len {
        return Err(FrameError::Truncated { expected: len, actual: n });
    }
    Ok(Some(payload))
}

/// Write `payload` as a single frame and flush the stream.
pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = frame_len(payload)?;
    stream.write_all(&len.to_le_bytes()).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await?;
    Ok(())
}

fn frame_len(payload: &[u8]) -> Result<u32, FrameError> {
    u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge { len: payload.len(), max: u32::MAX as usize })
}

/// Like `read_exact`, but reports how many bytes were read before the stream ended instead of failing outright.
async fn read_full<R>(stream: &mut R, buf: &mut [u8]) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let Some(rest) = buf.get_mut(filled..) else { break };
        let n = stream.read(rest).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod test {
    use super::*;

    const MAX: usize = 1024;

    #[test]
    fn frame_layout() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(frame, vec![5, 0, 0, 0, b'h', b'e', b'l', b'l', b'o']);
        let (payload, used) = decode_frame(&frame).unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(used, 9);
    }

    #[test]
    fn decode_truncated() {
        assert!(matches!(decode_frame(&[1, 0]), Err(FrameError::Truncated { expected: 4, actual: 2 })));
        let err = decode_frame(&[3, 0, 0, 0, 9]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: 3, actual: 1 }));
    }

    #[test]
    fn decode_leaves_trailing_bytes() {
        let mut buf = encode_frame(b"ab").unwrap();
        buf.extend(encode_frame(b"cde").unwrap());
        let (first, used) = decode_frame(&buf).unwrap();
        assert_eq!(first, b"ab");
        let (second, _) = decode_frame(&buf[used..]).unwrap();
        assert_eq!(second, b"cde");
    }

    #[tokio::test]
    async fn stream_round_trip_with_split_writes() {
        let (mut client, mut server) = tokio::io::duplex(3);
        let writer = tokio::spawn(async move {
            write_frame(&mut client, b"first frame").await.unwrap();
            write_frame(&mut client, b"").await.unwrap();
            write_frame(&mut client, b"third").await.unwrap();
        });
        assert_eq!(read_frame(&mut server, MAX).await.unwrap().unwrap(), b"first frame");
        assert_eq!(read_frame(&mut server, MAX).await.unwrap().unwrap(), b"");
        assert_eq!(read_frame(&mut server, MAX).await.unwrap().unwrap(), b"third");
        writer.await.unwrap();
        assert!(read_frame(&mut server, MAX).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_truncated_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[10, 0, 0, 0, 1, 2, 3]).await.unwrap();
        drop(client);
        let err = read_frame(&mut server, MAX).await.unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: 10, actual: 3 }));
    }

    #[tokio::test]
    async fn stream_rejects_oversized_frames() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(MAX as u32 + 1).to_le_bytes()).await.unwrap();
        let err = read_frame(&mut server, MAX).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }
}
