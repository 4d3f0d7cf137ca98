//! Value types and the transcoder contract.
//!
//! The core moves opaque `{flags, bytes}` pairs; converting application
//! values to and from that shape is the transcoder's job and lives
//! outside the I/O core. [`RawTranscoder`] is the identity
//! implementation used when callers work with raw bytes.

use bytes::Bytes;

use crate::error::Error;

/// An opaque stored value: client-defined flags plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedData {
    pub flags: u32,
    pub data: Bytes,
}

/// A value returned by a retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub flags: u32,
    pub data: Bytes,
}

impl Value {
    /// Decode through a transcoder. `None` when the transcoder does not
    /// recognize the flags/payload.
    pub fn decode<C: Transcoder>(&self, transcoder: &C) -> Option<C::Item> {
        transcoder.decode(&CachedData {
            flags: self.flags,
            data: self.data.clone(),
        })
    }
}

/// A value plus the CAS token that guards it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasValue {
    /// Server-assigned version token, always nonzero.
    pub cas: u64,
    pub value: Value,
}

/// Converts application values to and from [`CachedData`].
pub trait Transcoder: Send + Sync {
    type Item;

    fn encode(&self, item: &Self::Item) -> Result<CachedData, Error>;
    fn decode(&self, data: &CachedData) -> Option<Self::Item>;

    /// Largest payload this transcoder will produce; submissions above
    /// it should be rejected before hitting the wire.
    fn max_size(&self) -> u32 {
        1024 * 1024
    }
}

/// Identity transcoder over raw bytes with zero flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTranscoder;

impl Transcoder for RawTranscoder {
    type Item = Bytes;

    fn encode(&self, item: &Bytes) -> Result<CachedData, Error> {
        Ok(CachedData {
            flags: 0,
            data: item.clone(),
        })
    }

    fn decode(&self, data: &CachedData) -> Option<Bytes> {
        Some(data.data.clone())
    }
}
