use crate::common::{
    sum_iter,
    zero_sum,
    Bytes32,
    NibblePath,
};

use alloc::vec::Vec;

/// Hash policy of a tree. Chosen once at construction as a type parameter so
/// the hot hashing paths dispatch statically.
///
/// Both schemes share the same canonical null hash for absent subtrees; a
/// present-but-empty child slot and a truly absent one are indistinguishable
/// in any preimage.
pub trait CommitmentScheme {
    fn null_hash() -> Bytes32 {
        *zero_sum()
    }

    /// Digest of a leaf, over the leaf's remaining path after its parent's
    /// branching nibble and the digest of its value.
    fn commit_leaf(suffix: &NibblePath, value_hash: &Bytes32) -> Bytes32;

    /// Digest of an internal node, over its skip prefix (the nibbles between
    /// the parent's branching nibble and this node's own branching position)
    /// and its 16 child slots.
    fn commit_branch(prefix: &NibblePath, children: &[Option<Bytes32>; 16]) -> Bytes32;
}

const LEAF_DOMAIN: [u8; 1] = [0x00];
const BRANCH_DOMAIN: [u8; 1] = [0x01];
const MPF_LEAF_HEAD: [u8; 1] = [0xff];

/// Direct 16-ary scheme: one hash invocation per level.
#[derive(Debug, Clone, Copy)]
pub struct Classic;

impl CommitmentScheme for Classic {
    fn commit_leaf(suffix: &NibblePath, value_hash: &Bytes32) -> Bytes32 {
        let mut preimage = Vec::with_capacity(1 + suffix.len() + 32);
        preimage.extend_from_slice(&LEAF_DOMAIN);
        preimage.extend_from_slice(&suffix.to_bytes());
        preimage.extend_from_slice(value_hash);
        crate::common::sum(preimage)
    }

    fn commit_branch(prefix: &NibblePath, children: &[Option<Bytes32>; 16]) -> Bytes32 {
        let null = Self::null_hash();
        let prefix_bytes = prefix.to_bytes();
        let parts = core::iter::once(&BRANCH_DOMAIN[..])
            .chain(core::iter::once(&prefix_bytes[..]))
            .chain(
                children
                    .iter()
                    .map(|child| child.as_ref().unwrap_or(&null).as_slice()),
            );
        sum_iter(parts)
    }
}

/// Binary-reduction scheme compatible with verifiers that only have a
/// two-input hash: the 16 child slots fold pairwise over 4 levels before the
/// skip prefix is hashed in.
#[derive(Debug, Clone, Copy)]
pub struct Mpf;

impl CommitmentScheme for Mpf {
    fn commit_leaf(suffix: &NibblePath, value_hash: &Bytes32) -> Bytes32 {
        let mut preimage = Vec::with_capacity(1 + suffix.len() + 32);
        preimage.extend_from_slice(&MPF_LEAF_HEAD);
        preimage.extend_from_slice(&suffix.to_bytes());
        preimage.extend_from_slice(value_hash);
        crate::common::sum(preimage)
    }

    fn commit_branch(prefix: &NibblePath, children: &[Option<Bytes32>; 16]) -> Bytes32 {
        branch_from_merkle(prefix, &merkle16(children))
    }
}

/// H(left ‖ right), substituting the null hash for absent inputs.
pub(crate) fn hash_pair(left: Option<&Bytes32>, right: Option<&Bytes32>) -> Bytes32 {
    let null = zero_sum();
    sum_iter([left.unwrap_or(null).as_slice(), right.unwrap_or(null)])
}

/// 4-level pairwise reduction of the 16 child slots.
pub(crate) fn merkle16(children: &[Option<Bytes32>; 16]) -> Bytes32 {
    merkle_range(children, 0, 16)
}

/// Pairwise reduction of `children[start..end]`; the range length must be a
/// power of two.
pub(crate) fn merkle_range(
    children: &[Option<Bytes32>; 16],
    start: usize,
    end: usize,
) -> Bytes32 {
    let null = zero_sum();
    let mut layer: Vec<Bytes32> = children[start..end]
        .iter()
        .map(|child| *child.as_ref().unwrap_or(null))
        .collect();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| hash_pair(pair.first(), pair.get(1)))
            .collect();
    }
    layer.first().copied().unwrap_or(*null)
}

/// Final MPF branch digest over the skip prefix and the reduced child root.
pub(crate) fn branch_from_merkle(prefix: &NibblePath, merkle: &Bytes32) -> Bytes32 {
    sum_iter([prefix.to_bytes().as_slice(), merkle])
}
