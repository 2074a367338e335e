//! Framing: envelope first, then a payload sized by the header.

use quill_messages::{Message, MessageHeader, HEADER_SIZE};
use quill_types::{NetworkId, ProtocolInfo};
use tokio::io::AsyncReadExt;

use crate::error::NetworkError;

/// Read one message from an async byte stream.
///
/// Reads the 16-byte envelope, validates network and version, derives the
/// payload length, reads exactly that many bytes, and parses. Any protocol
/// error closes the stream at the caller; oversized frames surface as
/// `ParseError::SizeTooLarge` before a single payload byte is read.
pub async fn read_frame<R>(
    reader: &mut R,
    network: NetworkId,
    protocol: ProtocolInfo,
) -> Result<Message, NetworkError>
where
    R: AsyncReadExt + Unpin,
{
    let mut envelope = [0u8; HEADER_SIZE];
    reader.read_exact(&mut envelope).await?;
    let header = MessageHeader::deserialize(&envelope)?;
    header.validate(network, protocol)?;

    let payload_length = header.payload_length()?;
    let mut payload = vec![0u8; payload_length];
    reader.read_exact(&mut payload).await?;

    Ok(Message::deserialize(&header, &payload)?)
}

/// Parse one message from a complete in-memory frame. Returns the message
/// and the number of bytes consumed.
pub fn parse_frame(
    bytes: &[u8],
    network: NetworkId,
    protocol: ProtocolInfo,
) -> Result<(Message, usize), NetworkError> {
    if bytes.len() < HEADER_SIZE {
        return Err(quill_messages::ParseError::InvalidHeader.into());
    }
    let header = MessageHeader::deserialize(&bytes[..HEADER_SIZE])?;
    header.validate(network, protocol)?;

    let payload_length = header.payload_length()?;
    let end = HEADER_SIZE + payload_length;
    if bytes.len() < end {
        return Err(quill_messages::ParseError::Generic.into());
    }
    let message = Message::deserialize(&header, &bytes[HEADER_SIZE..end])?;
    Ok((message, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_messages::{Keepalive, ParseError};

    fn network() -> NetworkId {
        NetworkId::Dev
    }

    fn protocol() -> ProtocolInfo {
        ProtocolInfo::default()
    }

    #[tokio::test]
    async fn reads_back_to_back_frames() {
        let keepalive = Message::Keepalive(Keepalive::default());
        let mut stream = Vec::new();
        stream.extend_from_slice(&keepalive.to_bytes(network(), protocol(), 1));
        stream.extend_from_slice(&Message::TelemetryReq.to_bytes(network(), protocol(), 2));

        let mut cursor = std::io::Cursor::new(stream);
        let first = read_frame(&mut cursor, network(), protocol()).await.unwrap();
        let second = read_frame(&mut cursor, network(), protocol()).await.unwrap();
        assert_eq!(first, keepalive);
        assert_eq!(second, Message::TelemetryReq);
    }

    #[tokio::test]
    async fn wrong_network_is_rejected() {
        let bytes =
            Message::TelemetryReq.to_bytes(NetworkId::Live, protocol(), 1);
        let mut cursor = std::io::Cursor::new(bytes);
        let error = read_frame(&mut cursor, network(), protocol())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            NetworkError::Parse(ParseError::InvalidNetwork)
        ));
    }

    #[test]
    fn parse_frame_reports_consumed_length() {
        let message = Message::Keepalive(Keepalive::default());
        let mut bytes = message.to_bytes(network(), protocol(), 1);
        bytes.extend_from_slice(&[0xFF; 10]); // trailing garbage from next frame

        let (decoded, consumed) = parse_frame(&bytes, network(), protocol()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(consumed, 160);
    }

    #[test]
    fn short_frame_is_an_error() {
        let message = Message::Keepalive(Keepalive::default());
        let bytes = message.to_bytes(network(), protocol(), 1);
        assert!(parse_frame(&bytes[..100], network(), protocol()).is_err());
    }
}
