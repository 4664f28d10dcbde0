//! Wire framing: `u32` big-endian body length, then one kind byte.
//!
//! Kind 1 carries a JSON [`Envelope`]. Kind 2 carries raw bytes for a topic:
//! `u16` topic length, topic, payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use skylink_proto::message::Envelope;

use crate::LinkError;

const KIND_JSON: u8 = 1;
const KIND_BINARY: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Json(Envelope),
    Binary { topic: String, payload: Bytes },
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, LinkError> {
        let mut body = BytesMut::new();
        match self {
            Frame::Json(env) => {
                body.put_u8(KIND_JSON);
                body.extend_from_slice(&serde_json::to_vec(env)?);
            }
            Frame::Binary { topic, payload } => {
                let topic_len = u16::try_from(topic.len())
                    .map_err(|_| LinkError::Frame(format!("topic too long: {} bytes", topic.len())))?;
                body.put_u8(KIND_BINARY);
                body.put_u16(topic_len);
                body.extend_from_slice(topic.as_bytes());
                body.extend_from_slice(payload);
            }
        }
        let len = u32::try_from(body.len()).map_err(|_| LinkError::Frame("frame too large".into()))?;
        let mut out = BytesMut::with_capacity(4 + body.len());
        out.put_u32(len);
        out.extend_from_slice(&body);
        Ok(out.freeze())
    }

    /// Decodes a frame body (length prefix already stripped).
    pub fn decode(mut body: Bytes) -> Result<Frame, LinkError> {
        if body.is_empty() {
            return Err(LinkError::Frame("empty frame".into()));
        }
        match body.get_u8() {
            KIND_JSON => Ok(Frame::Json(serde_json::from_slice(&body)?)),
            KIND_BINARY => {
                if body.len() < 2 {
                    return Err(LinkError::Frame("truncated binary frame".into()));
                }
                let n = body.get_u16() as usize;
                if body.len() < n {
                    return Err(LinkError::Frame("truncated topic".into()));
                }
                let topic = String::from_utf8(body.split_to(n).to_vec())
                    .map_err(|_| LinkError::Frame("topic is not utf-8".into()))?;
                Ok(Frame::Binary { topic, payload: body })
            }
            other => Err(LinkError::Frame(format!("unknown frame kind {}", other))),
        }
    }
}
