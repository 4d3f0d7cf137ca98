//! Ketama consistent hash ring.
//!
//! Each node is placed on a 32-bit ring at 160 points per unit of weight,
//! derived from `MD5("{identity}-{i}")` with the four little-endian u32
//! words read at digest offsets 0, 4, 8 and 12. Keys route to the first
//! point at or after their hash, wrapping at the top of the ring. Adding
//! or removing a node remaps only that node's arcs.

use crate::hash::{hash, HashAlg};
use crate::md5::Md5;

/// Points per node at weight 1; each MD5 digest contributes four.
const POINTS_PER_NODE: usize = 160;

/// Immutable ketama ring over a fixed node set.
#[derive(Clone, Debug)]
pub struct KetamaRing {
    /// Sorted (hash point, node index) pairs.
    points: Box<[(u32, u16)]>,
    node_count: u16,
    key_alg: HashAlg,
}

impl KetamaRing {
    /// Build a ring from node identity strings at equal weight, hashing
    /// keys with the ketama hash.
    pub fn build<S: AsRef<str>>(identities: &[S]) -> Self {
        Self::builder().key_alg(HashAlg::Ketama).nodes(identities).build()
    }

    pub fn builder() -> KetamaRingBuilder {
        KetamaRingBuilder::new()
    }

    /// Index of the node owning `key`.
    #[inline]
    pub fn primary(&self, key: &[u8]) -> usize {
        if self.node_count <= 1 {
            return 0;
        }
        let h = hash(self.key_alg, key);
        self.points[self.point_at(h)].1 as usize
    }

    /// Walk the ring clockwise from `key`'s position, yielding each
    /// distinct node once, primary first.
    pub fn sequence(&self, key: &[u8]) -> KetamaSequence<'_> {
        let start = if self.points.is_empty() {
            0
        } else {
            self.point_at(hash(self.key_alg, key))
        };
        KetamaSequence {
            points: &self.points,
            pos: start,
            visited: 0,
            seen: vec![false; self.node_count as usize],
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count as usize
    }

    /// Total virtual node points on the ring.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    // First point at or after `h`, wrapping to the lowest point.
    #[inline]
    fn point_at(&self, h: u32) -> usize {
        let idx = self.points.partition_point(|&(point, _)| point < h);
        if idx == self.points.len() {
            0
        } else {
            idx
        }
    }
}

/// Iterator over distinct node indices in ring order from a key's point.
pub struct KetamaSequence<'a> {
    points: &'a [(u32, u16)],
    pos: usize,
    visited: usize,
    seen: Vec<bool>,
}

impl Iterator for KetamaSequence<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.visited < self.points.len() {
            let (_, node) = self.points[self.pos];
            self.pos = (self.pos + 1) % self.points.len();
            self.visited += 1;
            let node = node as usize;
            if !self.seen[node] {
                self.seen[node] = true;
                return Some(node);
            }
        }
        None
    }
}

/// Builder for a [`KetamaRing`] with weighted nodes and a key hash
/// algorithm override.
pub struct KetamaRingBuilder {
    nodes: Vec<(String, u32)>,
    key_alg: HashAlg,
}

impl KetamaRingBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            key_alg: HashAlg::Ketama,
        }
    }

    /// Add a node with weight 1.
    pub fn node(self, identity: &str) -> Self {
        self.weighted_node(identity, 1)
    }

    /// Add a node with the given weight; weight W yields `160 * W` points.
    pub fn weighted_node(mut self, identity: &str, weight: u32) -> Self {
        self.nodes.push((identity.to_owned(), weight));
        self
    }

    pub fn nodes<S: AsRef<str>>(mut self, identities: &[S]) -> Self {
        for identity in identities {
            self = self.node(identity.as_ref());
        }
        self
    }

    /// Algorithm used to hash keys onto the ring. Node placement always
    /// uses MD5 regardless of this setting.
    pub fn key_alg(mut self, alg: HashAlg) -> Self {
        self.key_alg = alg;
        self
    }

    /// Build the immutable ring.
    ///
    /// # Panics
    ///
    /// Panics if no nodes were added.
    pub fn build(self) -> KetamaRing {
        assert!(!self.nodes.is_empty(), "ring requires at least one node");

        let mut points = Vec::new();
        for (node_idx, (identity, weight)) in self.nodes.iter().enumerate() {
            let digests = POINTS_PER_NODE * (*weight as usize) / 4;
            for i in 0..digests {
                let mut ctx = Md5::new();
                ctx.update(identity.as_bytes());
                ctx.update(b"-");
                ctx.update(i.to_string().as_bytes());
                let digest = ctx.finalize();

                for word in 0..4 {
                    let off = word * 4;
                    let point = u32::from_le_bytes([
                        digest[off],
                        digest[off + 1],
                        digest[off + 2],
                        digest[off + 3],
                    ]);
                    points.push((point, node_idx as u16));
                }
            }
        }
        points.sort_unstable();

        KetamaRing {
            points: points.into_boxed_slice(),
            node_count: self.nodes.len() as u16,
            key_alg: self.key_alg,
        }
    }
}

impl Default for KetamaRingBuilder {
    fn default() -> Self {
        Self::new()
    }
}
