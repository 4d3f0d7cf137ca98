//! Key hashing and node locators for a sharded memcached client.
//!
//! Two placement strategies are provided behind the [`NodeLocator`]
//! enum: [`KetamaRing`] (MD5-based consistent hashing, compatible with
//! libmemcached/twemproxy ketama — a membership change remaps only ~1/N
//! of keys) and [`ArrayRing`] (`hash % N`). A locator is an immutable
//! snapshot over an indexed node set; it never performs I/O and never
//! consults per-call state, so routing depends only on the key and the
//! node set.

mod array;
mod hash;
mod ketama;
mod md5;

pub use array::{ArrayRing, ArraySequence};
pub use hash::{hash, ketama_hash, HashAlg};
pub use ketama::{KetamaRing, KetamaRingBuilder, KetamaSequence};
pub use md5::{md5, Md5};

/// An immutable key-to-node placement snapshot.
#[derive(Clone, Debug)]
pub enum NodeLocator {
    Array(ArrayRing),
    Ketama(KetamaRing),
}

impl NodeLocator {
    /// Build a ketama locator from node identity strings.
    pub fn ketama<S: AsRef<str>>(identities: &[S], key_alg: HashAlg) -> Self {
        NodeLocator::Ketama(
            KetamaRing::builder()
                .nodes(identities)
                .key_alg(key_alg)
                .build(),
        )
    }

    /// Build a modulo locator over `node_count` nodes.
    pub fn array(node_count: usize, key_alg: HashAlg) -> Self {
        NodeLocator::Array(ArrayRing::new(node_count, key_alg))
    }

    /// Index of the node owning `key`.
    #[inline]
    pub fn primary(&self, key: &[u8]) -> usize {
        match self {
            NodeLocator::Array(ring) => ring.primary(key),
            NodeLocator::Ketama(ring) => ring.primary(key),
        }
    }

    /// Distinct candidate nodes for `key`, primary first. Used to find a
    /// live fallback when the primary is down.
    pub fn sequence(&self, key: &[u8]) -> Sequence<'_> {
        match self {
            NodeLocator::Array(ring) => Sequence::Array(ring.sequence(key)),
            NodeLocator::Ketama(ring) => Sequence::Ketama(ring.sequence(key)),
        }
    }

    /// All node indices.
    pub fn all(&self) -> impl Iterator<Item = usize> {
        0..self.node_count()
    }

    pub fn node_count(&self) -> usize {
        match self {
            NodeLocator::Array(ring) => ring.node_count(),
            NodeLocator::Ketama(ring) => ring.node_count(),
        }
    }

    /// A read-only snapshot of this locator. Locators are immutable, so
    /// this is a plain clone.
    pub fn readonly_copy(&self) -> Self {
        self.clone()
    }
}

/// Fallback iteration order for a key, unified over both ring kinds.
pub enum Sequence<'a> {
    Array(ArraySequence),
    Ketama(KetamaSequence<'a>),
}

impl Iterator for Sequence<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            Sequence::Array(seq) => seq.next(),
            Sequence::Ketama(seq) => seq.next(),
        }
    }
}
