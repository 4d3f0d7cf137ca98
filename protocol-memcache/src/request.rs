//! ASCII request encoding.
//!
//! Commands:
//! - `get <k>...` / `gets <k>...`
//! - `<set|add|replace|append|prepend> <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
//! - `cas <key> <flags> <exptime> <bytes> <cas>\r\n<data>\r\n`
//! - `delete <key>`, `incr|decr <key> <by>`
//! - `flush_all [delay]`, `version`, `stats [arg]`
//!
//! `exptime` is passed to the server verbatim; values up to 30 days are
//! relative seconds, larger values are absolute Unix time. That contract
//! belongs to the server and is not interpreted here.

use std::io::Write;

/// One encodable command.
#[derive(Debug, Clone)]
pub enum Request<'a> {
    /// `get` over one or more keys.
    Get { keys: &'a [&'a [u8]] },
    /// `gets` (returns CAS tokens) over one or more keys.
    Gets { keys: &'a [&'a [u8]] },
    Set {
        key: &'a [u8],
        flags: u32,
        exptime: u32,
        data: &'a [u8],
    },
    Add {
        key: &'a [u8],
        flags: u32,
        exptime: u32,
        data: &'a [u8],
    },
    Replace {
        key: &'a [u8],
        flags: u32,
        exptime: u32,
        data: &'a [u8],
    },
    Append { key: &'a [u8], data: &'a [u8] },
    Prepend { key: &'a [u8], data: &'a [u8] },
    Cas {
        key: &'a [u8],
        flags: u32,
        exptime: u32,
        cas: u64,
        data: &'a [u8],
    },
    Delete { key: &'a [u8] },
    Incr { key: &'a [u8], delta: u64 },
    Decr { key: &'a [u8], delta: u64 },
    FlushAll { delay: Option<u32> },
    Version,
    Stats { arg: Option<&'a [u8]> },
}

impl Request<'_> {
    /// Append the encoded command to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Request::Get { keys } => encode_retrieval(buf, b"get", keys),
            Request::Gets { keys } => encode_retrieval(buf, b"gets", keys),
            Request::Set {
                key,
                flags,
                exptime,
                data,
            } => encode_storage(buf, b"set", key, *flags, *exptime, None, data),
            Request::Add {
                key,
                flags,
                exptime,
                data,
            } => encode_storage(buf, b"add", key, *flags, *exptime, None, data),
            Request::Replace {
                key,
                flags,
                exptime,
                data,
            } => encode_storage(buf, b"replace", key, *flags, *exptime, None, data),
            Request::Append { key, data } => {
                encode_storage(buf, b"append", key, 0, 0, None, data)
            }
            Request::Prepend { key, data } => {
                encode_storage(buf, b"prepend", key, 0, 0, None, data)
            }
            Request::Cas {
                key,
                flags,
                exptime,
                cas,
                data,
            } => encode_storage(buf, b"cas", key, *flags, *exptime, Some(*cas), data),
            Request::Delete { key } => {
                buf.extend_from_slice(b"delete ");
                buf.extend_from_slice(key);
                buf.extend_from_slice(b"\r\n");
            }
            Request::Incr { key, delta } => encode_arith(buf, b"incr", key, *delta),
            Request::Decr { key, delta } => encode_arith(buf, b"decr", key, *delta),
            Request::FlushAll { delay } => {
                buf.extend_from_slice(b"flush_all");
                if let Some(delay) = delay {
                    write!(buf, " {delay}").unwrap();
                }
                buf.extend_from_slice(b"\r\n");
            }
            Request::Version => buf.extend_from_slice(b"version\r\n"),
            Request::Stats { arg } => {
                buf.extend_from_slice(b"stats");
                if let Some(arg) = arg {
                    buf.push(b' ');
                    buf.extend_from_slice(arg);
                }
                buf.extend_from_slice(b"\r\n");
            }
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        self.encode(&mut buf);
        buf
    }
}

fn encode_retrieval(buf: &mut Vec<u8>, verb: &[u8], keys: &[&[u8]]) {
    buf.extend_from_slice(verb);
    for key in keys {
        buf.push(b' ');
        buf.extend_from_slice(key);
    }
    buf.extend_from_slice(b"\r\n");
}

// Shared storage-command layout; `cas` distinguishes the five-field form.
fn encode_storage(
    buf: &mut Vec<u8>,
    verb: &[u8],
    key: &[u8],
    flags: u32,
    exptime: u32,
    cas: Option<u64>,
    data: &[u8],
) {
    buf.extend_from_slice(verb);
    buf.push(b' ');
    buf.extend_from_slice(key);
    match cas {
        Some(cas) => write!(buf, " {flags} {exptime} {} {cas}\r\n", data.len()).unwrap(),
        None => write!(buf, " {flags} {exptime} {}\r\n", data.len()).unwrap(),
    }
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

fn encode_arith(buf: &mut Vec<u8>, verb: &[u8], key: &[u8], delta: u64) {
    buf.extend_from_slice(verb);
    buf.push(b' ');
    buf.extend_from_slice(key);
    write!(buf, " {delta}\r\n").unwrap();
}
