use crate::common::{
    Bytes32,
    NibblePath,
};

use alloc::vec::Vec;
use core::fmt::{
    self,
    Debug,
    Formatter,
};

/// Versioned node identity. A write never mutates a published node; it
/// allocates fresh `NodeKey`s along the rewritten path at the new version and
/// leaves the superseded keys resolvable until pruned.
///
/// Internal nodes are addressed by their path prefix, leaves by the full
/// 64-nibble expansion of their key digest.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeKey {
    version: u64,
    path: NibblePath,
}

impl NodeKey {
    pub fn new(version: u64, path: NibblePath) -> Self {
        Self { version, path }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn path(&self) -> &NibblePath {
        &self.path
    }
}

impl Debug for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey(v{}, {:?})", self.version, self.path)
    }
}

/// Leaf payload. The raw value never lives in the tree; only its digest does,
/// with the value itself kept in the store's versioned value index.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeafNode {
    key_hash: Bytes32,
    value_hash: Bytes32,
}

impl LeafNode {
    pub fn new(key_hash: Bytes32, value_hash: Bytes32) -> Self {
        Self {
            key_hash,
            value_hash,
        }
    }

    pub fn key_hash(&self) -> &Bytes32 {
        &self.key_hash
    }

    pub fn value_hash(&self) -> &Bytes32 {
        &self.value_hash
    }
}

impl Debug for LeafNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafNode")
            .field("key_hash", &hex::encode(self.key_hash))
            .field("value_hash", &hex::encode(self.value_hash))
            .finish()
    }
}

/// Internal node with 16 child slots, stored compactly as an occupancy bitmap
/// plus the hashes of the occupied slots in ascending nibble order.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InternalNode {
    bitmap: u16,
    hashes: Vec<Bytes32>,
}

impl InternalNode {
    pub fn from_children(children: &[Option<Bytes32>; 16]) -> Self {
        let mut bitmap = 0u16;
        let mut hashes = Vec::new();
        for (nibble, child) in children.iter().enumerate() {
            if let Some(hash) = child {
                bitmap |= 1 << nibble;
                hashes.push(*hash);
            }
        }
        Self { bitmap, hashes }
    }

    pub fn bitmap(&self) -> u16 {
        self.bitmap
    }

    /// Expands the compact representation back into 16 optional slots.
    pub fn children(&self) -> [Option<Bytes32>; 16] {
        let mut children = [None; 16];
        let mut cursor = 0;
        for (nibble, child) in children.iter_mut().enumerate() {
            if self.bitmap & (1 << nibble) != 0 {
                *child = self.hashes.get(cursor).copied();
                cursor = cursor.saturating_add(1);
            }
        }
        children
    }

    pub fn child(&self, nibble: u8) -> Option<Bytes32> {
        let mask = 1u16.checked_shl(nibble.into())?;
        if self.bitmap & mask == 0 {
            return None;
        }
        // Children below `nibble` precede it in the compact vector.
        let position = (self.bitmap & mask.wrapping_sub(1)).count_ones() as usize;
        self.hashes.get(position).copied()
    }

    pub fn child_count(&self) -> usize {
        self.bitmap.count_ones() as usize
    }

    pub fn sole_child(&self) -> Option<(u8, Bytes32)> {
        if self.child_count() != 1 {
            return None;
        }
        let nibble = self.bitmap.trailing_zeros() as u8;
        let hash = self.hashes.first().copied()?;
        Some((nibble, hash))
    }
}

impl Debug for InternalNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hashes = self
            .hashes
            .iter()
            .map(hex::encode)
            .collect::<Vec<_>>()
            .join(", ");
        f.debug_struct("InternalNode")
            .field("bitmap", &format_args!("{:#018b}", self.bitmap))
            .field("hashes", &format_args!("[{}]", hashes))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    pub fn leaf(key_hash: Bytes32, value_hash: Bytes32) -> Self {
        Node::Leaf(LeafNode::new(key_hash, value_hash))
    }

    pub fn internal(children: &[Option<Bytes32>; 16]) -> Self {
        Node::Internal(InternalNode::from_children(children))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Leaf(_) => None,
            Node::Internal(internal) => Some(internal),
        }
    }
}
