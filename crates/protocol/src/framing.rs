//! Chunked binary framing over a text-oriented frame channel.
//!
//! A message with a binary payload travels as two logical parts: a text
//! frame whose message announces `binary_length = N`, then one or more
//! binary frames whose concatenated bytes total exactly N. Announcements
//! complete strictly in FIFO order; the protocol never interleaves the
//! chunks of two incomplete transfers.

use crate::error::{ProtocolError, Result};
use crate::message::Message;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Reserved heartbeat literal sent by clients. Never JSON-decoded.
pub const PING: &str = "ping";

/// Reserved heartbeat literal sent by servers. Never JSON-decoded.
pub const PONG: &str = "pong";

use colonnade_transport::Frame;

/// Encodes logical messages into transport frames.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    chunk_size: usize,
}

impl FrameEncoder {
    /// Create an encoder that splits binary payloads at `chunk_size` bytes.
    #[must_use]
    pub const fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Encode one message into the frame sequence that carries it.
    ///
    /// If the message holds a binary payload it is extracted, announced via
    /// `binary_length`, and emitted as trailing binary frames. The text
    /// frame always precedes its binary frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if the message cannot be
    /// represented on the wire (e.g. non-finite floats).
    pub fn encode(&self, mut message: Message) -> Result<Vec<Frame>> {
        let binary = message.take_binary();
        if let Some(bytes) = &binary {
            message.binary_length = Some(bytes.len() as u64);
        }

        let text = serde_json::to_string(&message).map_err(ProtocolError::Encode)?;
        let mut frames = vec![Frame::Text(text)];

        if let Some(mut bytes) = binary {
            while !bytes.is_empty() {
                let take = bytes.len().min(self.chunk_size.max(1));
                frames.push(Frame::Binary(bytes.split_to(take)));
            }
        }

        Ok(frames)
    }
}

/// Outcome of feeding one frame to the decoder.
#[derive(Debug)]
pub enum Decoded {
    /// One or more logical messages completed.
    ///
    /// A single binary frame can complete several queued announcements at
    /// once when transfers are short, so this carries a vec.
    Complete(Vec<Message>),
    /// The frame was consumed; more binary chunks are needed.
    Incomplete,
    /// The reserved heartbeat request literal.
    Ping,
    /// The reserved heartbeat reply literal.
    Pong,
}

/// Decodes transport frames back into logical messages.
///
/// Holds the queue of announced-but-incomplete binary transfers and the
/// accumulator for the transfer at the front of the queue.
#[derive(Debug)]
pub struct FrameDecoder {
    pending: VecDeque<(Message, u64)>,
    accumulator: BytesMut,
    max_binary_size: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects announcements above `max_binary_size`.
    #[must_use]
    pub fn new(max_binary_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            accumulator: BytesMut::new(),
            max_binary_size,
        }
    }

    /// Feed one frame to the decoder.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] on malformed text, an unannounced binary
    /// frame, or accumulated bytes exceeding the announced lengths. After
    /// a framing error the decoder state is no longer trustworthy and the
    /// connection should be closed.
    pub fn decode(&mut self, frame: Frame) -> Result<Decoded> {
        match frame {
            Frame::Text(text) if text == PING => Ok(Decoded::Ping),
            Frame::Text(text) if text == PONG => Ok(Decoded::Pong),
            Frame::Text(text) => {
                let message: Message = serde_json::from_str(&text)?;
                match message.binary_length {
                    Some(length) => {
                        let size = usize::try_from(length).unwrap_or(usize::MAX);
                        if size > self.max_binary_size {
                            return Err(ProtocolError::BinaryTooLarge {
                                size,
                                max: self.max_binary_size,
                            });
                        }
                        self.pending.push_back((message, length));
                        // A zero-length transfer at the head of the queue
                        // completes without any binary frame.
                        let completed = self.drain_completed();
                        if completed.is_empty() {
                            Ok(Decoded::Incomplete)
                        } else {
                            Ok(Decoded::Complete(completed))
                        }
                    }
                    None => Ok(Decoded::Complete(vec![message])),
                }
            }
            Frame::Binary(bytes) => {
                if self.pending.is_empty() {
                    return Err(ProtocolError::UnexpectedBinary);
                }
                self.accumulator.extend_from_slice(&bytes);

                let outstanding: u64 = self.pending.iter().map(|(_, len)| *len).sum();
                let accumulated = self.accumulator.len();
                if (accumulated as u64) > outstanding {
                    return Err(ProtocolError::LengthMismatch {
                        expected: usize::try_from(outstanding).unwrap_or(usize::MAX),
                        actual: accumulated,
                    });
                }

                let completed = self.drain_completed();
                if completed.is_empty() {
                    Ok(Decoded::Incomplete)
                } else {
                    Ok(Decoded::Complete(completed))
                }
            }
        }
    }

    /// Pop every front announcement whose payload is fully accumulated,
    /// reattaching payloads in FIFO order.
    fn drain_completed(&mut self) -> Vec<Message> {
        let mut completed = Vec::new();
        loop {
            let Some((_, length)) = self.pending.front() else {
                break;
            };
            let length = usize::try_from(*length).unwrap_or(usize::MAX);
            if self.accumulator.len() < length {
                break;
            }
            let (mut message, _) = self
                .pending
                .pop_front()
                .unwrap_or_else(|| unreachable!("front checked above"));
            let payload: Bytes = self.accumulator.split_to(length).freeze();
            message.attach_binary(payload);
            completed.push(message);
        }
        completed
    }

    /// Number of announced transfers still awaiting binary frames.
    #[must_use]
    pub fn pending_transfers(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::value::EngineValue;
    use proptest::prelude::*;

    fn decode_all(decoder: &mut FrameDecoder, frames: Vec<Frame>) -> Vec<Message> {
        let mut out = Vec::new();
        for frame in frames {
            match decoder.decode(frame).unwrap() {
                Decoded::Complete(msgs) => out.extend(msgs),
                Decoded::Incomplete => {}
                Decoded::Ping | Decoded::Pong => panic!("unexpected heartbeat"),
            }
        }
        out
    }

    #[test]
    fn test_text_only_roundtrip() {
        let encoder = FrameEncoder::new(1024);
        let decoder = &mut FrameDecoder::new(1024);

        let msg = Message::response(1, EngineValue::mapping([("a", EngineValue::Int(1))]));
        let frames = encoder.encode(msg.clone()).unwrap();
        assert_eq!(frames.len(), 1);

        let decoded = decode_all(decoder, frames);
        assert_eq!(decoded, vec![msg]);
    }

    #[test]
    fn test_binary_roundtrip_single_chunk() {
        let payload = Bytes::from(vec![7u8; 100]);
        let encoder = FrameEncoder::new(1024);
        let mut decoder = FrameDecoder::new(1024);

        let msg = Message::table_method(
            2,
            "t1",
            "update",
            vec![
                EngineValue::Binary(payload.clone()),
                EngineValue::empty_mapping(),
            ],
        );
        let frames = encoder.encode(msg).unwrap();
        assert_eq!(frames.len(), 2);

        let decoded = decode_all(&mut decoder, frames);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].args[0], EngineValue::Binary(payload));
        assert_eq!(decoded[0].binary_length, None);
    }

    #[test]
    fn test_binary_split_into_chunks() {
        let payload = Bytes::from((0u8..=255).collect::<Vec<_>>());
        let encoder = FrameEncoder::new(100);
        let mut decoder = FrameDecoder::new(1024);

        let msg = Message::response(3, EngineValue::Binary(payload.clone()));
        let frames = encoder.encode(msg).unwrap();
        // 256 bytes at chunk size 100: text + 3 binary frames.
        assert_eq!(frames.len(), 4);

        let decoded = decode_all(&mut decoder, frames);
        assert_eq!(decoded[0].data, Some(EngineValue::Binary(payload)));
    }

    #[test]
    fn test_fifo_binary_matching() {
        // A1 announces 5 bytes, A2 announces 3; chunks arrive split across
        // transfer boundaries of A1. A1 must complete before A2.
        let mut decoder = FrameDecoder::new(1024);

        let a1 = Message::response(1, EngineValue::Binary(Bytes::from_static(b"11111")));
        let a2 = Message::response(2, EngineValue::Binary(Bytes::from_static(b"222")));

        let mut a1_announce = a1.clone();
        let b1 = a1_announce.take_binary().unwrap();
        a1_announce.binary_length = Some(5);
        let mut a2_announce = a2.clone();
        let b2 = a2_announce.take_binary().unwrap();
        a2_announce.binary_length = Some(3);

        let announcements = vec![
            Frame::Text(serde_json::to_string(&a1_announce).unwrap()),
            Frame::Text(serde_json::to_string(&a2_announce).unwrap()),
        ];
        assert!(decode_all(&mut decoder, announcements).is_empty());
        assert_eq!(decoder.pending_transfers(), 2);

        let chunks = vec![
            Frame::Binary(b1.slice(0..2)),
            Frame::Binary(b1.slice(2..5)),
            Frame::Binary(b2),
        ];
        let decoded = decode_all(&mut decoder, chunks);
        assert_eq!(decoder.pending_transfers(), 0);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].id, 1);
        assert_eq!(
            decoded[0].data,
            Some(EngineValue::Binary(Bytes::from_static(b"11111")))
        );
        assert_eq!(decoded[1].id, 2);
        assert_eq!(
            decoded[1].data,
            Some(EngineValue::Binary(Bytes::from_static(b"222")))
        );
    }

    #[test]
    fn test_unannounced_binary_is_protocol_error() {
        let mut decoder = FrameDecoder::new(1024);
        let result = decoder.decode(Frame::Binary(Bytes::from_static(b"oops")));
        assert!(matches!(result, Err(ProtocolError::UnexpectedBinary)));
    }

    #[test]
    fn test_overlong_binary_is_protocol_error() {
        let mut decoder = FrameDecoder::new(1024);
        let mut announce = Message::response(1, EngineValue::Null);
        announce.binary_length = Some(2);

        decoder
            .decode(Frame::Text(serde_json::to_string(&announce).unwrap()))
            .unwrap();
        let result = decoder.decode(Frame::Binary(Bytes::from_static(b"toolong")));
        assert!(matches!(result, Err(ProtocolError::LengthMismatch { .. })));
    }

    #[test]
    fn test_announcement_above_max_rejected() {
        let mut decoder = FrameDecoder::new(16);
        let mut announce = Message::response(1, EngineValue::Null);
        announce.binary_length = Some(17);

        let result = decoder.decode(Frame::Text(serde_json::to_string(&announce).unwrap()));
        assert!(matches!(result, Err(ProtocolError::BinaryTooLarge { .. })));
    }

    #[test]
    fn test_heartbeat_literals_bypass_json() {
        let mut decoder = FrameDecoder::new(1024);
        assert!(matches!(
            decoder.decode(Frame::Text(PING.to_string())).unwrap(),
            Decoded::Ping
        ));
        assert!(matches!(
            decoder.decode(Frame::Text(PONG.to_string())).unwrap(),
            Decoded::Pong
        ));
    }

    #[test]
    fn test_zero_length_binary_completes_immediately() {
        let encoder = FrameEncoder::new(1024);
        let mut decoder = FrameDecoder::new(1024);

        let msg = Message::response(4, EngineValue::Binary(Bytes::new()));
        let frames = encoder.encode(msg).unwrap();
        // Empty payload needs no binary frame at all.
        assert_eq!(frames.len(), 1);

        let decoded = decode_all(&mut decoder, frames);
        assert_eq!(decoded[0].data, Some(EngineValue::Binary(Bytes::new())));
    }

    proptest! {
        // Any payload reassembles identically no matter how the chunk size
        // slices it.
        #[test]
        fn prop_roundtrip_under_arbitrary_chunking(
            payload in proptest::collection::vec(any::<u8>(), 1..2048),
            chunk_size in 1usize..512,
        ) {
            let encoder = FrameEncoder::new(chunk_size);
            let mut decoder = FrameDecoder::new(1 << 20);

            let bytes = Bytes::from(payload.clone());
            let msg = Message::response(9, EngineValue::Binary(bytes));
            let frames = encoder.encode(msg).unwrap();

            let mut completed = Vec::new();
            for frame in frames {
                if let Decoded::Complete(msgs) = decoder.decode(frame).unwrap() {
                    completed.extend(msgs);
                }
            }

            prop_assert_eq!(completed.len(), 1);
            prop_assert_eq!(
                completed[0].data.clone(),
                Some(EngineValue::Binary(Bytes::from(payload)))
            );
        }
    }
}
