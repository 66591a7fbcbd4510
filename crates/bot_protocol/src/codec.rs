//! Length-prefixed frame codec.
//!
//! Each frame is a 4-byte big-endian length followed by exactly that many
//! payload bytes. Lengths of zero or above [`MAX_FRAME_SIZE`] are protocol
//! violations and are rejected before any payload byte is read.

use crate::error::FrameError;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Hard per-frame payload cap, enforced in both directions.
pub const MAX_FRAME_SIZE: usize = 1_048_576;

const LENGTH_PREFIX: usize = 4;

/// Prepends the big-endian payload length to `payload`.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    check_length(payload.len() as u64)?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before the first
/// byte of a new frame. A close anywhere after that first byte, in the length
/// prefix or in the payload, is reported as [`FrameError::PrematureClose`].
///
/// Not cancel-safe: dropping the future part way through a frame leaves the
/// stream desynchronized.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX];
    let received = read_full(reader, &mut prefix).await?;
    if received == 0 {
        return Ok(None);
    }
    if received < LENGTH_PREFIX {
        return Err(FrameError::PrematureClose {
            expected: LENGTH_PREFIX,
            received,
        });
    }

    let length = u32::from_be_bytes(prefix) as u64;
    check_length(length)?;

    let mut payload = vec![0u8; length as usize];
    let received = read_full(reader, &mut payload).await?;
    if received < payload.len() {
        return Err(FrameError::PrematureClose {
            expected: payload.len(),
            received,
        });
    }

    Ok(Some(payload))
}

fn check_length(length: u64) -> Result<(), FrameError> {
    if length == 0 || length > MAX_FRAME_SIZE as u64 {
        return Err(FrameError::InvalidLength(length));
    }
    Ok(())
}

/// Fills `buf` from the reader, stopping early only on a zero-byte read.
/// Returns how many bytes were accumulated.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_encode_prefixes_big_endian_length() {
        let frame = encode(b"abc").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 3]);
        assert_eq!(&frame[4..], b"abc");

        let frame = encode(&vec![7u8; 0x0102]).unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0x01, 0x02]);
    }

    #[test]
    fn test_encode_rejects_empty_and_oversized_payloads() {
        assert!(matches!(encode(b""), Err(FrameError::InvalidLength(0))));
        let oversized = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            encode(&oversized),
            Err(FrameError::InvalidLength(n)) if n == MAX_FRAME_SIZE as u64 + 1
        ));
    }

    #[tokio::test]
    async fn test_round_trip_payloads() {
        let payloads: Vec<Vec<u8>> = vec![
            b"x".to_vec(),
            "42:9f1c2d3e-uuid".as_bytes().to_vec(),
            vec![0xAB; 64 * 1024],
            vec![1u8; MAX_FRAME_SIZE],
        ];

        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend(encode(payload).unwrap());
        }

        let mut reader = Cursor::new(stream);
        for payload in &payloads {
            let decoded = read_frame(&mut reader).await.unwrap();
            assert_eq!(decoded.as_deref(), Some(payload.as_slice()));
        }
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_lengths_consume_only_the_prefix() {
        for length in [0u32, MAX_FRAME_SIZE as u32 + 1, u32::MAX] {
            let mut bytes = length.to_be_bytes().to_vec();
            bytes.extend_from_slice(&[9u8; 32]);
            let mut reader = Cursor::new(bytes);

            let result = read_frame(&mut reader).await;
            assert!(
                matches!(result, Err(FrameError::InvalidLength(n)) if n == length as u64),
                "length {length} should be rejected"
            );
            assert_eq!(reader.position(), 4, "only the prefix may be consumed");
        }
    }

    #[tokio::test]
    async fn test_empty_stream_is_clean_end_of_stream() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_inside_prefix_is_an_error() {
        let mut reader = Cursor::new(vec![0u8, 0]);
        let result = read_frame(&mut reader).await;
        assert!(matches!(
            result,
            Err(FrameError::PrematureClose { expected: 4, received: 2 })
        ));
    }

    #[tokio::test]
    async fn test_close_inside_payload_is_an_error() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        let mut reader = Cursor::new(bytes);

        let result = read_frame(&mut reader).await;
        assert!(matches!(
            result,
            Err(FrameError::PrematureClose { expected: 10, received: 5 })
        ));
    }

    #[tokio::test]
    async fn test_partial_reads_are_accumulated() {
        // An 8-byte pipe forces the payload to arrive in many small reads.
        let (mut client, mut server) = tokio::io::duplex(8);
        let payload: Vec<u8> = (0..200u8).collect();
        let frame = encode(&payload).unwrap();

        let writer = tokio::spawn(async move {
            for chunk in frame.chunks(3) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let decoded = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded, Some(payload));
        writer.await.unwrap();
    }
}
