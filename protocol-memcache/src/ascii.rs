//! Incremental ASCII response decoder.
//!
//! [`AsciiDecoder::decode`] consumes as much of the input as it can and
//! returns at most one [`Frame`] per call, together with the number of
//! bytes consumed. The caller loops until no bytes are consumed and no
//! frame is produced, then waits for more data. The decoder is
//! restartable at any byte boundary: a `VALUE` body is accumulated into a
//! per-value buffer as bytes arrive, so values larger than the
//! connection's read buffer stream through without growing it.

use bytes::Bytes;

use crate::error::ParseError;
use crate::frame::{Frame, Reply};

/// Upper bound for a single response line (VALUE/STAT/VERSION/errors).
const MAX_LINE_LEN: usize = 8 * 1024;

/// Default cap on one value body (the memcached default item limit).
const DEFAULT_MAX_VALUE_LEN: usize = 1024 * 1024;

enum DecodeState {
    /// Scanning for the next `\r\n`-terminated line.
    Line,
    /// Accumulating a VALUE body; `need` bytes outstanding.
    Body {
        key: Bytes,
        flags: u32,
        cas: Option<u64>,
        data: Vec<u8>,
        need: usize,
    },
    /// Consuming the `\r\n` after a VALUE body; `need` is 2 or 1.
    Trailer {
        key: Bytes,
        flags: u32,
        cas: Option<u64>,
        data: Vec<u8>,
        need: usize,
    },
}

/// Restartable decoder for ASCII responses.
pub struct AsciiDecoder {
    state: DecodeState,
    max_value_len: usize,
}

impl AsciiDecoder {
    pub fn new() -> Self {
        Self::with_max_value_len(DEFAULT_MAX_VALUE_LEN)
    }

    /// Decoder with a non-default value size cap (for servers configured
    /// with a larger item limit).
    pub fn with_max_value_len(max_value_len: usize) -> Self {
        Self {
            state: DecodeState::Line,
            max_value_len,
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecodeState::Line)
    }

    /// Drop any partial state (after a connection is torn down).
    pub fn reset(&mut self) {
        self.state = DecodeState::Line;
    }

    /// Decode one frame from `input`.
    ///
    /// Returns `(frame, consumed)`. `(None, n)` with `n > 0` means
    /// progress was made on a partial value; `(None, 0)` means more data
    /// is needed.
    pub fn decode(&mut self, input: &[u8]) -> Result<(Option<Frame>, usize), ParseError> {
        let mut consumed = 0;

        loop {
            let state = std::mem::replace(&mut self.state, DecodeState::Line);
            match state {
                DecodeState::Line => {
                    let rem = &input[consumed..];
                    let Some(line_len) = find_line(rem)? else {
                        return Ok((None, consumed));
                    };
                    let line = &rem[..line_len];
                    consumed += line_len + 2;

                    if let Some(rest) = line.strip_prefix(b"VALUE ") {
                        let (key, flags, cas, need) = parse_value_header(rest, self.max_value_len)?;
                        self.state = if need == 0 {
                            DecodeState::Trailer {
                                key,
                                flags,
                                cas,
                                data: Vec::new(),
                                need: 2,
                            }
                        } else {
                            DecodeState::Body {
                                key,
                                flags,
                                cas,
                                data: Vec::with_capacity(need),
                                need,
                            }
                        };
                        continue;
                    }

                    return Ok((Some(parse_line(line)?), consumed));
                }

                DecodeState::Body {
                    key,
                    flags,
                    cas,
                    mut data,
                    mut need,
                } => {
                    let rem = &input[consumed..];
                    let take = need.min(rem.len());
                    data.extend_from_slice(&rem[..take]);
                    consumed += take;
                    need -= take;
                    if need > 0 {
                        self.state = DecodeState::Body {
                            key,
                            flags,
                            cas,
                            data,
                            need,
                        };
                        return Ok((None, consumed));
                    }
                    self.state = DecodeState::Trailer {
                        key,
                        flags,
                        cas,
                        data,
                        need: 2,
                    };
                }

                DecodeState::Trailer {
                    key,
                    flags,
                    cas,
                    data,
                    mut need,
                } => {
                    let rem = &input[consumed..];
                    let mut offset = 0;
                    while need > 0 && offset < rem.len() {
                        let expected = if need == 2 { b'\r' } else { b'\n' };
                        if rem[offset] != expected {
                            return Err(ParseError::Protocol("missing data terminator"));
                        }
                        offset += 1;
                        need -= 1;
                    }
                    consumed += offset;
                    if need > 0 {
                        self.state = DecodeState::Trailer {
                            key,
                            flags,
                            cas,
                            data,
                            need,
                        };
                        return Ok((None, consumed));
                    }
                    return Ok((
                        Some(Frame::Value {
                            key,
                            flags,
                            cas,
                            data: Bytes::from(data),
                        }),
                        consumed,
                    ));
                }
            }
        }
    }
}

impl Default for AsciiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the next line (excluding CRLF), or None if incomplete.
fn find_line(data: &[u8]) -> Result<Option<usize>, ParseError> {
    match memchr::memchr(b'\n', data) {
        Some(0) => Err(ParseError::Protocol("malformed line")),
        Some(pos) => {
            if data[pos - 1] != b'\r' {
                return Err(ParseError::Protocol("malformed line"));
            }
            Ok(Some(pos - 1))
        }
        None => {
            if data.len() > MAX_LINE_LEN {
                return Err(ParseError::Protocol("line too long"));
            }
            Ok(None)
        }
    }
}

/// Parse `<key> <flags> <bytes> [<cas>]` after `VALUE `.
fn parse_value_header(
    rest: &[u8],
    max_value_len: usize,
) -> Result<(Bytes, u32, Option<u64>, usize), ParseError> {
    let mut parts = rest.split(|&b| b == b' ');
    let key = parts.next().filter(|k| !k.is_empty());
    let flags = parts.next();
    let len = parts.next();
    let (Some(key), Some(flags), Some(len)) = (key, flags, len) else {
        return Err(ParseError::Protocol("invalid VALUE line"));
    };

    let flags: u32 = parse_num(flags)?;
    let len: usize = parse_num(len)?;
    if len > max_value_len {
        return Err(ParseError::Protocol("value too large"));
    }

    let cas = match parts.next() {
        Some(cas) => Some(parse_num::<u64>(cas)?),
        None => None,
    };
    if parts.next().is_some() {
        return Err(ParseError::Protocol("invalid VALUE line"));
    }

    Ok((Bytes::copy_from_slice(key), flags, cas, len))
}

/// Parse a complete non-VALUE line into a frame.
fn parse_line(line: &[u8]) -> Result<Frame, ParseError> {
    let reply = match line {
        b"STORED" => Reply::Stored,
        b"NOT_STORED" => Reply::NotStored,
        b"EXISTS" => Reply::Exists,
        b"NOT_FOUND" => Reply::NotFound,
        b"DELETED" => Reply::Deleted,
        b"OK" => Reply::Ok,
        b"END" => Reply::End,
        b"ERROR" => Reply::Error,
        _ => {
            if let Some(rest) = line.strip_prefix(b"STAT ") {
                let split = memchr::memchr(b' ', rest)
                    .ok_or(ParseError::Protocol("invalid STAT line"))?;
                return Ok(Frame::Stat {
                    name: Bytes::copy_from_slice(&rest[..split]),
                    value: Bytes::copy_from_slice(&rest[split + 1..]),
                });
            }
            if let Some(rest) = line.strip_prefix(b"VERSION ") {
                Reply::Version(Bytes::copy_from_slice(rest))
            } else if let Some(rest) = line.strip_prefix(b"CLIENT_ERROR ") {
                Reply::ClientError(String::from_utf8_lossy(rest).into_owned())
            } else if let Some(rest) = line.strip_prefix(b"SERVER_ERROR ") {
                Reply::ServerError(String::from_utf8_lossy(rest).into_owned())
            } else if !line.is_empty() && line.iter().all(|b| b.is_ascii_digit()) {
                Reply::Numeric(parse_num(line)?)
            } else {
                return Err(ParseError::Protocol("unknown response"));
            }
        }
    };
    Ok(Frame::Done(reply))
}

fn parse_num<T: std::str::FromStr>(data: &[u8]) -> Result<T, ParseError> {
    std::str::from_utf8(data)
        .map_err(|_| ParseError::InvalidNumber)?
        .parse()
        .map_err(|_| ParseError::InvalidNumber)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the decoder to completion over `input`, collecting frames.
    fn decode_all(input: &[u8]) -> Vec<Frame> {
        let mut decoder = AsciiDecoder::new();
        let mut frames = Vec::new();
        let mut pos = 0;
        loop {
            let (frame, consumed) = decoder.decode(&input[pos..]).unwrap();
            pos += consumed;
            match frame {
                Some(frame) => frames.push(frame),
                None => {
                    assert_eq!(pos, input.len(), "decoder stalled mid-input");
                    return frames;
                }
            }
        }
    }

    #[test]
    fn simple_replies() {
        assert_eq!(decode_all(b"STORED\r\n"), vec![Frame::Done(Reply::Stored)]);
        assert_eq!(
            decode_all(b"NOT_STORED\r\n"),
            vec![Frame::Done(Reply::NotStored)]
        );
        assert_eq!(decode_all(b"EXISTS\r\n"), vec![Frame::Done(Reply::Exists)]);
        assert_eq!(
            decode_all(b"NOT_FOUND\r\n"),
            vec![Frame::Done(Reply::NotFound)]
        );
        assert_eq!(decode_all(b"DELETED\r\n"), vec![Frame::Done(Reply::Deleted)]);
        assert_eq!(decode_all(b"OK\r\n"), vec![Frame::Done(Reply::Ok)]);
        assert_eq!(decode_all(b"END\r\n"), vec![Frame::Done(Reply::End)]);
        assert_eq!(decode_all(b"ERROR\r\n"), vec![Frame::Done(Reply::Error)]);
    }

    #[test]
    fn get_hit_then_end() {
        let frames = decode_all(b"VALUE foo 0 3\r\nbar\r\nEND\r\n");
        assert_eq!(
            frames,
            vec![
                Frame::Value {
                    key: Bytes::from_static(b"foo"),
                    flags: 0,
                    cas: None,
                    data: Bytes::from_static(b"bar"),
                },
                Frame::Done(Reply::End),
            ]
        );
    }

    #[test]
    fn multi_value_with_cas() {
        let frames = decode_all(b"VALUE k1 7 2 100\r\nv1\r\nVALUE k2 0 2 200\r\nv2\r\nEND\r\n");
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames[0],
            Frame::Value {
                key: Bytes::from_static(b"k1"),
                flags: 7,
                cas: Some(100),
                data: Bytes::from_static(b"v1"),
            }
        );
        assert_eq!(
            frames[1],
            Frame::Value {
                key: Bytes::from_static(b"k2"),
                flags: 0,
                cas: Some(200),
                data: Bytes::from_static(b"v2"),
            }
        );
        assert_eq!(frames[2], Frame::Done(Reply::End));
    }

    #[test]
    fn empty_value_body() {
        let frames = decode_all(b"VALUE e 0 0\r\n\r\nEND\r\n");
        assert_eq!(
            frames[0],
            Frame::Value {
                key: Bytes::from_static(b"e"),
                flags: 0,
                cas: None,
                data: Bytes::new(),
            }
        );
    }

    #[test]
    fn byte_at_a_time_restartability() {
        let input = b"VALUE foo 42 5 9\r\nhello\r\nEND\r\n";
        let mut decoder = AsciiDecoder::new();
        let mut frames = Vec::new();
        let mut buffered: Vec<u8> = Vec::new();
        for &byte in input.iter() {
            buffered.push(byte);
            loop {
                let (frame, consumed) = decoder.decode(&buffered).unwrap();
                buffered.drain(..consumed);
                match frame {
                    Some(frame) => frames.push(frame),
                    None => break,
                }
            }
        }
        assert_eq!(
            frames,
            vec![
                Frame::Value {
                    key: Bytes::from_static(b"foo"),
                    flags: 42,
                    cas: Some(9),
                    data: Bytes::from_static(b"hello"),
                },
                Frame::Done(Reply::End),
            ]
        );
    }

    #[test]
    fn value_larger_than_read_chunk_streams() {
        // 100KB value fed in 512-byte chunks; the decoder accumulates the
        // body without ever seeing the full frame contiguously.
        let body = vec![b'x'; 100 * 1024];
        let mut input = format!("VALUE big 0 {}\r\n", body.len()).into_bytes();
        input.extend_from_slice(&body);
        input.extend_from_slice(b"\r\nEND\r\n");

        let mut decoder = AsciiDecoder::new();
        let mut frames = Vec::new();
        let mut buffered: Vec<u8> = Vec::new();
        for chunk in input.chunks(512) {
            buffered.extend_from_slice(chunk);
            loop {
                let (frame, consumed) = decoder.decode(&buffered).unwrap();
                buffered.drain(..consumed);
                match frame {
                    Some(frame) => frames.push(frame),
                    None => break,
                }
            }
            // The holding buffer never grows beyond one chunk plus a
            // partial line.
            assert!(buffered.len() <= 512 + 64);
        }
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Frame::Value { key, data, .. } => {
                assert_eq!(key.as_ref(), b"big");
                assert_eq!(data.len(), body.len());
                assert_eq!(data.as_ref(), &body[..]);
            }
            other => panic!("expected value frame, got {other:?}"),
        }
        assert_eq!(frames[1], Frame::Done(Reply::End));
    }

    #[test]
    fn stats_stream() {
        let frames = decode_all(b"STAT pid 1234\r\nSTAT version 1.6.9\r\nEND\r\n");
        assert_eq!(
            frames[0],
            Frame::Stat {
                name: Bytes::from_static(b"pid"),
                value: Bytes::from_static(b"1234"),
            }
        );
        assert_eq!(
            frames[1],
            Frame::Stat {
                name: Bytes::from_static(b"version"),
                value: Bytes::from_static(b"1.6.9"),
            }
        );
        assert_eq!(frames[2], Frame::Done(Reply::End));
    }

    #[test]
    fn version_line() {
        assert_eq!(
            decode_all(b"VERSION 1.6.21\r\n"),
            vec![Frame::Done(Reply::Version(Bytes::from_static(b"1.6.21")))]
        );
    }

    #[test]
    fn numeric_reply() {
        assert_eq!(decode_all(b"11\r\n"), vec![Frame::Done(Reply::Numeric(11))]);
        assert_eq!(
            decode_all(b"18446744073709551615\r\n"),
            vec![Frame::Done(Reply::Numeric(u64::MAX))]
        );
    }

    #[test]
    fn errors_carry_message_verbatim() {
        assert_eq!(
            decode_all(b"SERVER_ERROR object too large for cache\r\n"),
            vec![Frame::Done(Reply::ServerError(
                "object too large for cache".into()
            ))]
        );
        assert_eq!(
            decode_all(b"CLIENT_ERROR bad data chunk\r\n"),
            vec![Frame::Done(Reply::ClientError("bad data chunk".into()))]
        );
    }

    #[test]
    fn incomplete_line_consumes_nothing() {
        let mut decoder = AsciiDecoder::new();
        assert_eq!(decoder.decode(b"STOR").unwrap(), (None, 0));
        assert_eq!(decoder.decode(b"STORED\r").unwrap(), (None, 0));
        let (frame, consumed) = decoder.decode(b"STORED\r\n").unwrap();
        assert_eq!(frame, Some(Frame::Done(Reply::Stored)));
        assert_eq!(consumed, 8);
    }

    #[test]
    fn unknown_line_is_protocol_error() {
        let mut decoder = AsciiDecoder::new();
        assert_eq!(
            decoder.decode(b"BOGUS\r\n"),
            Err(ParseError::Protocol("unknown response"))
        );
    }

    #[test]
    fn bad_value_terminator_is_protocol_error() {
        let mut decoder = AsciiDecoder::new();
        let mut pos = 0;
        let input = b"VALUE k 0 5\r\nhelloXXEND\r\n";
        let err = loop {
            match decoder.decode(&input[pos..]) {
                Ok((_, consumed)) => pos += consumed,
                Err(err) => break err,
            }
        };
        assert_eq!(err, ParseError::Protocol("missing data terminator"));
    }

    #[test]
    fn oversized_value_rejected() {
        let mut decoder = AsciiDecoder::with_max_value_len(1024);
        assert_eq!(
            decoder.decode(b"VALUE k 0 2048\r\n"),
            Err(ParseError::Protocol("value too large"))
        );
    }

    #[test]
    fn bare_newline_is_malformed() {
        let mut decoder = AsciiDecoder::new();
        assert_eq!(
            decoder.decode(b"STORED\n"),
            Err(ParseError::Protocol("malformed line"))
        );
    }

    #[test]
    fn reset_clears_partial_state() {
        let mut decoder = AsciiDecoder::new();
        let (_, consumed) = decoder.decode(b"VALUE k 0 10\r\nhell").unwrap();
        assert!(consumed > 0);
        assert!(!decoder.is_idle());
        decoder.reset();
        assert!(decoder.is_idle());
        let (frame, _) = decoder.decode(b"STORED\r\n").unwrap();
        assert_eq!(frame, Some(Frame::Done(Reply::Stored)));
    }
}
