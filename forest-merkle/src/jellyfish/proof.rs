use crate::common::{
    Bytes32,
    NibblePath,
};

use alloc::vec::Vec;
use core::fmt;

fn fmt_children(
    f: &mut fmt::Formatter<'_>,
    children: &[Option<Bytes32>; 16],
) -> fmt::Result {
    let mut list = f.debug_list();
    for child in children {
        match child {
            Some(hash) => list.entry(&hex::encode(hash)),
            None => list.entry(&"-"),
        };
    }
    list.finish()
}

/// One traversed node on the path from the root to the proven position.
///
/// `skip` is the node's compressed segment relative to its parent and
/// `child_index` the nibble the traversal took out of it. When the node holds
/// exactly one sibling next to the traversed slot, that sibling is carried in
/// `neighbor` so compact encodings can reconstruct it without store access.
#[derive(Clone, PartialEq, Eq)]
pub struct BranchStep {
    pub skip: NibblePath,
    pub children: [Option<Bytes32>; 16],
    pub child_index: u8,
    pub neighbor: Option<StepNeighbor>,
}

impl fmt::Debug for BranchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("BranchStep");
        debug.field("skip", &self.skip);
        debug.field("child_index", &self.child_index);
        debug.field("neighbor", &self.neighbor);
        struct Children<'a>(&'a [Option<Bytes32>; 16]);
        impl fmt::Debug for Children<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt_children(f, self.0)
            }
        }
        debug.field("children", &Children(&self.children));
        debug.finish()
    }
}

/// The lone sibling of a traversed slot, in full.
#[derive(Clone, PartialEq, Eq)]
pub enum StepNeighbor {
    Internal {
        nibble: u8,
        prefix: NibblePath,
        children: [Option<Bytes32>; 16],
    },
    Leaf {
        nibble: u8,
        key_hash: Bytes32,
        value_hash: Bytes32,
    },
}

impl StepNeighbor {
    pub fn nibble(&self) -> u8 {
        match self {
            Self::Internal { nibble, .. } | Self::Leaf { nibble, .. } => *nibble,
        }
    }
}

impl fmt::Debug for StepNeighbor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal {
                nibble,
                prefix,
                children,
            } => {
                let mut debug = f.debug_struct("Internal");
                debug.field("nibble", nibble);
                debug.field("prefix", prefix);
                struct Children<'a>(&'a [Option<Bytes32>; 16]);
                impl fmt::Debug for Children<'_> {
                    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        fmt_children(f, self.0)
                    }
                }
                debug.field("children", &Children(children));
                debug.finish()
            }
            Self::Leaf {
                nibble,
                key_hash,
                value_hash,
            } => f
                .debug_struct("Leaf")
                .field("nibble", nibble)
                .field("key_hash", &hex::encode(key_hash))
                .field("value_hash", &hex::encode(value_hash))
                .finish(),
        }
    }
}

/// A divergence point inside a compressed segment: the internal node whose
/// segment the queried path exits partway through. `skip` is the shared head
/// of the segment, `nibble` the node's own next nibble and `prefix` the
/// remainder of its segment.
#[derive(Clone, PartialEq, Eq)]
pub struct ForkStep {
    pub skip: NibblePath,
    pub nibble: u8,
    pub prefix: NibblePath,
    pub children: [Option<Bytes32>; 16],
}

impl fmt::Debug for ForkStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ForkStep");
        debug.field("skip", &self.skip);
        debug.field("nibble", &self.nibble);
        debug.field("prefix", &self.prefix);
        struct Children<'a>(&'a [Option<Bytes32>; 16]);
        impl fmt::Debug for Children<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt_children(f, self.0)
            }
        }
        debug.field("children", &Children(&self.children));
        debug.finish()
    }
}

/// The key is present; `value_hash` is the digest bound by the terminal leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub steps: Vec<BranchStep>,
    pub value_hash: Bytes32,
}

/// The key is absent and the traversal ended in empty space: either a vacant
/// child slot (no `fork`) or a divergence inside a compressed segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonInclusionEmptyProof {
    pub steps: Vec<BranchStep>,
    pub fork: Option<ForkStep>,
}

/// The key is absent; a different leaf occupies the position where it would
/// have to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonInclusionLeafProof {
    pub steps: Vec<BranchStep>,
    pub leaf_key_hash: Bytes32,
    pub leaf_value_hash: Bytes32,
}

/// A proof of inclusion or non-inclusion for one key against one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JmtProof {
    Inclusion(InclusionProof),
    NonInclusionEmpty(NonInclusionEmptyProof),
    NonInclusionDifferentLeaf(NonInclusionLeafProof),
}

impl JmtProof {
    pub fn is_inclusion(&self) -> bool {
        matches!(self, Self::Inclusion(_))
    }

    pub fn steps(&self) -> &[BranchStep] {
        match self {
            Self::Inclusion(proof) => &proof.steps,
            Self::NonInclusionEmpty(proof) => &proof.steps,
            Self::NonInclusionDifferentLeaf(proof) => &proof.steps,
        }
    }
}
