mod commitment;
mod node;
mod reference;
mod streaming;
mod verify;

pub mod in_memory;
pub mod merkle_tree;
pub mod proof;
pub mod store;

pub use commitment::{
    Classic,
    CommitmentScheme,
    Mpf,
};
pub(crate) use commitment::{
    branch_from_merkle,
    hash_pair,
    merkle16,
    merkle_range,
};
pub use merkle_tree::{
    EngineMode,
    JellyfishMerkleTree,
    MerkleTreeError,
    PruneReport,
    TreeConfig,
};
pub use node::{
    InternalNode,
    LeafNode,
    Node,
    NodeKey,
};
pub use verify::{
    verify,
    MalformedProof,
};

use crate::common::{
    zero_sum,
    Bytes32,
};

/// Root hash of a tree with no leaves.
pub const fn empty_root() -> &'static Bytes32 {
    zero_sum()
}
