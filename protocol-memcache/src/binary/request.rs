//! Binary request encoders.
//!
//! Each function appends one framed packet to `buf`. Arithmetic extras
//! carry (delta, initial, expiration); an expiration of `0xffffffff`
//! tells the server not to create a missing counter.

use super::header::{put_request_header, Opcode};

/// Expiration sentinel: fail an incr/decr on a missing key instead of
/// seeding it.
pub const NO_CREATE: u32 = 0xffff_ffff;

pub fn get(buf: &mut Vec<u8>, key: &[u8], opaque: u32) {
    put_request_header(buf, Opcode::Get, key.len(), 0, 0, opaque, 0);
    buf.extend_from_slice(key);
}

/// GetK: the response echoes the key, which multi-key reconciliation
/// relies on.
pub fn getk(buf: &mut Vec<u8>, key: &[u8], opaque: u32) {
    put_request_header(buf, Opcode::GetK, key.len(), 0, 0, opaque, 0);
    buf.extend_from_slice(key);
}

/// Quiet GetK: misses produce no response; terminate a batch with
/// [`noop`].
pub fn getkq(buf: &mut Vec<u8>, key: &[u8], opaque: u32) {
    put_request_header(buf, Opcode::GetKQ, key.len(), 0, 0, opaque, 0);
    buf.extend_from_slice(key);
}

/// Set/Add/Replace. A nonzero `cas` turns a Set into a compare-and-swap.
pub fn store(
    buf: &mut Vec<u8>,
    opcode: Opcode,
    key: &[u8],
    flags: u32,
    exptime: u32,
    value: &[u8],
    cas: u64,
) {
    debug_assert!(matches!(
        opcode,
        Opcode::Set | Opcode::Add | Opcode::Replace
    ));
    put_request_header(buf, opcode, key.len(), 8, value.len(), 0, cas);
    buf.extend_from_slice(&flags.to_be_bytes());
    buf.extend_from_slice(&exptime.to_be_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

pub fn concat(buf: &mut Vec<u8>, opcode: Opcode, key: &[u8], value: &[u8]) {
    debug_assert!(matches!(opcode, Opcode::Append | Opcode::Prepend));
    put_request_header(buf, opcode, key.len(), 0, value.len(), 0, 0);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

pub fn delete(buf: &mut Vec<u8>, key: &[u8]) {
    put_request_header(buf, Opcode::Delete, key.len(), 0, 0, 0, 0);
    buf.extend_from_slice(key);
}

pub fn arith(
    buf: &mut Vec<u8>,
    opcode: Opcode,
    key: &[u8],
    delta: u64,
    initial: u64,
    exptime: u32,
) {
    debug_assert!(matches!(opcode, Opcode::Increment | Opcode::Decrement));
    put_request_header(buf, opcode, key.len(), 20, 0, 0, 0);
    buf.extend_from_slice(&delta.to_be_bytes());
    buf.extend_from_slice(&initial.to_be_bytes());
    buf.extend_from_slice(&exptime.to_be_bytes());
    buf.extend_from_slice(key);
}

pub fn flush(buf: &mut Vec<u8>, delay: Option<u32>) {
    match delay {
        Some(delay) => {
            put_request_header(buf, Opcode::Flush, 0, 4, 0, 0, 0);
            buf.extend_from_slice(&delay.to_be_bytes());
        }
        None => put_request_header(buf, Opcode::Flush, 0, 0, 0, 0, 0),
    }
}

pub fn version(buf: &mut Vec<u8>) {
    put_request_header(buf, Opcode::Version, 0, 0, 0, 0, 0);
}

pub fn noop(buf: &mut Vec<u8>) {
    put_request_header(buf, Opcode::Noop, 0, 0, 0, 0, 0);
}

pub fn stat(buf: &mut Vec<u8>, arg: Option<&[u8]>) {
    let key = arg.unwrap_or(b"");
    put_request_header(buf, Opcode::Stat, key.len(), 0, 0, 0, 0);
    buf.extend_from_slice(key);
}
