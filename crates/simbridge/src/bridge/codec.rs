//! Envelope codec and stream framing for worker communication.
//!
//! Envelope encode/decode are pure transforms between protocol types and JSON
//! bytes. `FrameCodec` splits the socket byte stream into frames and works
//! over any AsyncRead/AsyncWrite via `FramedRead`/`FramedWrite`.
//!
//! Outgoing frames are compact JSON followed by `\n`. Incoming frames are
//! found by balanced-brace scanning, since the simulator writes bare JSON
//! objects with no terminator.

use std::io;

use serde_json::{Map, Value};
use tokio_util::bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{
    CommandEnvelope, CommandKind, CorrelationId, REQUEST_ID_FIELD, ReplyEnvelope, WireLayout,
};

/// Largest frame accepted from the worker; matches the simulator's own buffer.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed reply: {0}")]
    MalformedReply(String),
    #[error("malformed command: {0}")]
    MalformedCommand(String),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn encode_command(envelope: &CommandEnvelope, layout: WireLayout) -> Result<Bytes, CodecError> {
    let bytes = serde_json::to_vec(&envelope.to_wire(layout))?;
    Ok(Bytes::from(bytes))
}

/// Parse one reply object and split off its correlation id.
pub fn decode_reply(bytes: &[u8]) -> Result<ReplyEnvelope, CodecError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::MalformedReply(format!("invalid JSON: {}", e)))?;
    let Value::Object(mut object) = value else {
        return Err(CodecError::MalformedReply(
            "reply is not a JSON object".to_string(),
        ));
    };
    match object.remove(REQUEST_ID_FIELD) {
        Some(Value::String(id)) => Ok(ReplyEnvelope::new(CorrelationId::from(id), object)),
        Some(other) => Err(CodecError::MalformedReply(format!(
            "{} is not a string: {}",
            REQUEST_ID_FIELD, other
        ))),
        None => Err(CodecError::MalformedReply(format!(
            "missing {}",
            REQUEST_ID_FIELD
        ))),
    }
}

/// Worker-side inverse of `encode_command`. Used by in-process worker peers.
pub fn decode_command(bytes: &[u8], layout: WireLayout) -> Result<CommandEnvelope, CodecError> {
    let malformed = |msg: &str| CodecError::MalformedCommand(msg.to_string());

    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::MalformedCommand(format!("invalid JSON: {}", e)))?;
    let Value::Object(mut object) = value else {
        return Err(malformed("command is not a JSON object"));
    };
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .and_then(CommandKind::parse)
        .ok_or_else(|| malformed("missing or unknown type"))?;

    let (id, payload) = match layout {
        WireLayout::Nested => {
            let Some(Value::Object(mut data)) = object.remove("data") else {
                return Err(malformed("missing data object"));
            };
            let id = take_request_id(&mut data).ok_or_else(|| malformed("missing requestId"))?;
            (id, data.remove("config").unwrap_or(Value::Null))
        }
        WireLayout::Flat => {
            let id = take_request_id(&mut object).ok_or_else(|| malformed("missing requestId"))?;
            (id, object.remove("data").unwrap_or(Value::Null))
        }
    };

    Ok(CommandEnvelope::new(kind, id, payload))
}

pub fn encode_reply(reply: &ReplyEnvelope) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(&reply.to_wire())?))
}

fn take_request_id(object: &mut Map<String, Value>) -> Option<CorrelationId> {
    match object.remove(REQUEST_ID_FIELD)? {
        Value::String(s) => Some(CorrelationId::from(s)),
        _ => None,
    }
}

/// One unit read off the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A balanced `{...}` object, or junk that precedes one.
    Data(Bytes),
    /// A frame larger than the limit was dropped.
    Overflow { discarded: usize },
}

/// Brace-balancing frame splitter.
///
/// Scan state survives across `decode` calls so partial frames are not
/// rescanned from the start on every read.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    in_object: bool,
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    discarded: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            in_object: false,
            scanned: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            discarded: 0,
        }
    }

    fn reset(&mut self) {
        self.in_object = false;
        self.scanned = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.discarded = 0;
    }

    /// Advance the scanner over `buf[self.scanned..]`; returns the index of the
    /// closing brace if the object completes.
    fn scan(&mut self, buf: &[u8]) -> Option<usize> {
        for (i, &b) in buf.iter().enumerate().skip(self.scanned) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        self.scanned = buf.len();
        None
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.in_object {
            let leading_ws = src
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            src.advance(leading_ws);
            if src.is_empty() {
                return Ok(None);
            }

            if src[0] != b'{' {
                // Junk runs to the next newline (inclusive) or up to the next object.
                let end = src
                    .iter()
                    .position(|&b| b == b'\n' || b == b'{')
                    .map(|i| if src[i] == b'\n' { i + 1 } else { i });
                return match end {
                    Some(end) => Ok(Some(Frame::Data(src.split_to(end).freeze()))),
                    None if src.len() > self.max_frame_bytes => {
                        let discarded = src.len();
                        src.clear();
                        Ok(Some(Frame::Overflow { discarded }))
                    }
                    None => Ok(None),
                };
            }

            self.in_object = true;
        }

        match self.scan(src) {
            Some(end) if self.discarded > 0 => {
                let discarded = self.discarded + end + 1;
                src.advance(end + 1);
                self.reset();
                Ok(Some(Frame::Overflow { discarded }))
            }
            Some(end) => {
                let frame = src.split_to(end + 1).freeze();
                self.reset();
                Ok(Some(Frame::Data(frame)))
            }
            None => {
                if self.discarded > 0 || src.len() > self.max_frame_bytes {
                    // Keep the scan state but stop buffering the oversized frame.
                    self.discarded += src.len();
                    src.clear();
                    self.scanned = 0;
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.discarded > 0 {
            let discarded = self.discarded + src.len();
            src.clear();
            self.reset();
            return Ok(Some(Frame::Overflow { discarded }));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Truncated object at end of stream; surface it so it is logged as malformed.
        let rest = src.split().freeze();
        self.reset();
        Ok(Some(Frame::Data(rest)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        tracing::trace!(frame_size_bytes = item.len(), "Encoding frame");
        dst.reserve(item.len() + 1);
        dst.put(item);
        dst.put_u8(b'\n');
        Ok(())
    }
}
