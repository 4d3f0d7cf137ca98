//! Incremental binary response decoder.
//!
//! Emits the same [`Frame`] alphabet as the ASCII decoder so the
//! reconciliation layer is protocol-agnostic: get hits become `Value`
//! frames, stat packets become `Stat` frames, and everything else maps
//! onto a terminal [`Reply`]. A noop response and the empty stat packet
//! map to `Done(End)`, which is what terminates quiet-get batches and
//! stat streams.
//!
//! Arithmetic responses carry the new counter value as an 8-byte body,
//! surfaced directly as `Reply::Numeric` with no string round-trip.

use bytes::Bytes;

use super::header::{Opcode, ResponseHeader, Status, HEADER_LEN};
use crate::error::ParseError;
use crate::frame::{Frame, Reply};

/// Default cap on one response body (item limit plus framing slack).
const DEFAULT_MAX_BODY_LEN: usize = 1024 * 1024 + 1024;

enum DecodeState {
    /// Accumulating the 24-byte header.
    Header { buf: Vec<u8> },
    /// Accumulating `header.body_len` body bytes.
    Body {
        header: ResponseHeader,
        data: Vec<u8>,
    },
}

/// Restartable decoder for binary responses.
pub struct BinaryDecoder {
    state: DecodeState,
    max_body_len: usize,
}

impl BinaryDecoder {
    pub fn new() -> Self {
        Self::with_max_body_len(DEFAULT_MAX_BODY_LEN)
    }

    pub fn with_max_body_len(max_body_len: usize) -> Self {
        Self {
            state: DecodeState::Header {
                buf: Vec::with_capacity(HEADER_LEN),
            },
            max_body_len,
        }
    }

    /// True when no partial packet is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(&self.state, DecodeState::Header { buf } if buf.is_empty())
    }

    pub fn reset(&mut self) {
        self.state = DecodeState::Header {
            buf: Vec::with_capacity(HEADER_LEN),
        };
    }

    /// Decode one frame from `input`; same contract as the ASCII decoder.
    pub fn decode(&mut self, input: &[u8]) -> Result<(Option<Frame>, usize), ParseError> {
        let mut consumed = 0;

        loop {
            match &mut self.state {
                DecodeState::Header { buf } => {
                    let rem = &input[consumed..];
                    let take = (HEADER_LEN - buf.len()).min(rem.len());
                    buf.extend_from_slice(&rem[..take]);
                    consumed += take;
                    if buf.len() < HEADER_LEN {
                        return Ok((None, consumed));
                    }

                    let header = ResponseHeader::parse(buf)?;
                    if header.body_len as usize > self.max_body_len {
                        return Err(ParseError::Protocol("response body too large"));
                    }
                    if (header.extras_len as usize + header.key_len as usize)
                        > header.body_len as usize
                    {
                        return Err(ParseError::Protocol("invalid body layout"));
                    }
                    self.state = DecodeState::Body {
                        header,
                        data: Vec::with_capacity(header.body_len as usize),
                    };
                }

                DecodeState::Body { header, data } => {
                    let rem = &input[consumed..];
                    let take = (header.body_len as usize - data.len()).min(rem.len());
                    data.extend_from_slice(&rem[..take]);
                    consumed += take;
                    if data.len() < header.body_len as usize {
                        return Ok((None, consumed));
                    }

                    let header = *header;
                    let body = std::mem::take(data);
                    self.reset();
                    return Ok((Some(packet_to_frame(header, body)?), consumed));
                }
            }
        }
    }
}

impl Default for BinaryDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Map one complete response packet onto a frame.
fn packet_to_frame(header: ResponseHeader, body: Vec<u8>) -> Result<Frame, ParseError> {
    if !header.status.is_success() {
        let reply = match header.status {
            Status::KeyNotFound => Reply::NotFound,
            Status::KeyExists => Reply::Exists,
            Status::ItemNotStored => Reply::NotStored,
            status => Reply::ServerError(status.as_str().to_string()),
        };
        return Ok(Frame::Done(reply));
    }

    let extras = header.extras_len as usize;
    let key_end = extras + header.key_len as usize;

    let frame = match header.opcode {
        Opcode::Get | Opcode::GetQ | Opcode::GetK | Opcode::GetKQ => {
            if extras < 4 {
                return Err(ParseError::Protocol("get response missing flags"));
            }
            let flags = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            Frame::Value {
                key: Bytes::copy_from_slice(&body[extras..key_end]),
                flags,
                cas: Some(header.cas),
                data: Bytes::copy_from_slice(&body[key_end..]),
            }
        }
        Opcode::Set | Opcode::Add | Opcode::Replace | Opcode::Append | Opcode::Prepend => {
            Frame::Done(Reply::Stored)
        }
        Opcode::Delete => Frame::Done(Reply::Deleted),
        Opcode::Increment | Opcode::Decrement => {
            let value = body
                .get(key_end..key_end + 8)
                .ok_or(ParseError::Protocol("short arithmetic response"))?;
            Frame::Done(Reply::Numeric(u64::from_be_bytes(
                value.try_into().unwrap(),
            )))
        }
        Opcode::Version => Frame::Done(Reply::Version(Bytes::from(body))),
        Opcode::Flush => Frame::Done(Reply::Ok),
        Opcode::Noop => Frame::Done(Reply::End),
        Opcode::Stat => {
            if header.key_len == 0 {
                Frame::Done(Reply::End)
            } else {
                Frame::Stat {
                    name: Bytes::copy_from_slice(&body[extras..key_end]),
                    value: Bytes::copy_from_slice(&body[key_end..]),
                }
            }
        }
    };
    Ok(frame)
}
