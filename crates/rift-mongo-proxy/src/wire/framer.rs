//! Async reading and writing of whole wire messages.

use super::{WireError, HEADER_LEN, MAX_MESSAGE_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one length-prefixed message, including its length prefix.
///
/// Returns `Ok(None)` when the stream ends cleanly on a message boundary.
/// A stream that ends anywhere inside a message is an error: the caller is
/// expected to tear the connection down rather than retry.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Vec<u8>>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let first = reader.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < len_buf.len() {
        reader.read_exact(&mut len_buf[first..]).await?;
    }

    let declared = i32::from_le_bytes(len_buf);
    if declared < HEADER_LEN as i32 {
        return Err(WireError::LengthTooSmall(declared));
    }
    let length = declared as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(WireError::LengthTooLarge(declared));
    }

    let mut message = vec![0u8; length];
    message[..4].copy_from_slice(&len_buf);
    reader.read_exact(&mut message[4..]).await?;
    Ok(Some(message))
}

/// Write a complete message and flush it.
pub async fn write_message<W>(writer: &mut W, message: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_body(body: &[u8]) -> Vec<u8> {
        let total = (HEADER_LEN + body.len()) as i32;
        let mut msg = Vec::new();
        msg.extend_from_slice(&total.to_le_bytes());
        msg.extend_from_slice(&7i32.to_le_bytes());
        msg.extend_from_slice(&0i32.to_le_bytes());
        msg.extend_from_slice(&2004i32.to_le_bytes());
        msg.extend_from_slice(body);
        msg
    }

    #[tokio::test]
    async fn test_reads_consecutive_messages() {
        let first = message_with_body(b"abc");
        let second = message_with_body(b"");
        let stream = [first.clone(), second.clone()].concat();
        let mut reader = stream.as_slice();

        assert_eq!(read_message(&mut reader).await.unwrap(), Some(first));
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(second));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_short_body_is_an_error() {
        let mut msg = message_with_body(b"0123456789");
        msg.truncate(msg.len() - 3);
        let mut reader = msg.as_slice();

        let err = read_message(&mut reader).await.unwrap_err();
        match err {
            WireError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("Expected I/O error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_short_length_prefix_is_an_error() {
        let mut reader: &[u8] = &[0x10, 0x00];
        assert!(matches!(
            read_message(&mut reader).await,
            Err(WireError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_length_below_header() {
        let mut reader: &[u8] = &[0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            read_message(&mut reader).await,
            Err(WireError::LengthTooSmall(8))
        ));
    }

    #[tokio::test]
    async fn test_rejects_negative_length() {
        let bytes = (-1i32).to_le_bytes();
        let mut reader: &[u8] = &bytes;
        assert!(matches!(
            read_message(&mut reader).await,
            Err(WireError::LengthTooSmall(-1))
        ));
    }

    #[tokio::test]
    async fn test_rejects_oversized_length() {
        let bytes = (MAX_MESSAGE_SIZE as i32 + 1).to_le_bytes();
        let mut reader: &[u8] = &bytes;
        assert!(matches!(
            read_message(&mut reader).await,
            Err(WireError::LengthTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_write_message_round_trips_through_reader() {
        let msg = message_with_body(b"payload");
        let mut sink: Vec<u8> = Vec::new();
        write_message(&mut sink, &msg).await.unwrap();

        let mut reader = sink.as_slice();
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(msg));
    }
}
