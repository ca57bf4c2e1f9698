//! Length-prefixed framing for [`Envelope`]s.
//!
//! Each frame is a 4-byte big-endian length followed by the bincode encoding
//! of one envelope. Frames larger than [`MAX_FRAME_SIZE`] are rejected on
//! both sides.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;
use crate::protocol::Envelope;

#[derive(Debug)]
pub struct EnvelopeCodec {
    frames: LengthDelimitedCodec,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .max_frame_length(max_frame)
            .new_codec();
        Self { frames }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, ProtocolError> {
        match self.frames.decode(src)? {
            Some(frame) => Envelope::from_bytes(&frame)
                .map(Some)
                .map_err(ProtocolError::Decode),
            None => Ok(None),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let body = item.to_bytes().map_err(ProtocolError::Encode)?;
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Kind;
    use crate::types::UserId;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Envelope::new(Kind::GetContacts), &mut buf)
            .unwrap();

        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.kind, Kind::GetContacts);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = EnvelopeCodec::with_max_frame(16);
        let mut buf = BytesMut::new();
        let big = Envelope::new(Kind::TextMessage).with_content("x".repeat(64));
        assert!(codec.encode(big, &mut buf).is_err());
    }

    #[test]
    fn test_garbage_frame_is_decode_error() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 2, 0xff, 0xff][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_frames_over_duplex_stream() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut writer = FramedWrite::new(client, EnvelopeCodec::new());
        let mut reader = FramedRead::new(server, EnvelopeCodec::new());

        writer
            .send(Envelope::new(Kind::Login).with_sender_name("alice").with_content("pw"))
            .await
            .unwrap();
        writer
            .send(Envelope::new(Kind::TextMessage).for_user(UserId(9)).with_content("hi"))
            .await
            .unwrap();

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.kind, Kind::Login);
        assert_eq!(first.sender_name.as_deref(), Some("alice"));

        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(second.receiver_user(), Some(UserId(9)));
    }
}
