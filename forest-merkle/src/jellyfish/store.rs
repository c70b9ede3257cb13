use crate::{
    common::{
        Bytes32,
        NibblePath,
    },
    jellyfish::node::{
        Node,
        NodeKey,
    },
};

use alloc::vec::Vec;

/// Highest committed version together with its root hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VersionedRoot {
    pub version: u64,
    pub root: Bytes32,
}

/// What pruning does with historical values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Retention {
    /// Remove stale nodes only; value history stays readable.
    #[default]
    Safe,
    /// Also drop value history whose version falls inside the pruned range.
    Aggressive,
}

/// Per-commit knobs handed to the store when a batch opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitConfig {
    pub retention: Retention,
}

/// A node superseded by the commit at `stale_since_version`. It stays
/// resolvable for reads below that version until pruned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StaleNodeIndex {
    pub stale_since_version: u64,
    pub node_key: NodeKey,
}

/// Value operation recorded by a commit, keyed by the key digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueOp {
    Put(Bytes32, Vec<u8>),
    Delete(Bytes32),
}

impl ValueOp {
    pub fn key_hash(&self) -> &Bytes32 {
        match self {
            ValueOp::Put(key_hash, _) => key_hash,
            ValueOp::Delete(key_hash) => key_hash,
        }
    }
}

/// Everything one `put` produced. Nodes and stale markings are disjoint: a
/// key never appears in both `nodes` and `stale` for the same commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub version: u64,
    pub root_hash: Bytes32,
    pub nodes: Vec<(NodeKey, Node)>,
    pub stale: Vec<NodeKey>,
    pub value_ops: Vec<ValueOp>,
}

/// Buffered, single-writer commit scope. Nothing becomes visible until
/// `commit`; dropping the batch without committing discards every buffered
/// write and leaves the store exactly as before.
pub trait CommitBatch {
    type Error;

    fn put_node(&mut self, key: NodeKey, node: Node);
    fn mark_stale(&mut self, key: NodeKey);
    fn put_value(&mut self, key_hash: Bytes32, value: Vec<u8>);
    fn delete_value(&mut self, key_hash: Bytes32);
    fn set_root_hash(&mut self, root: Bytes32);
    fn commit(self) -> Result<(), Self::Error>;
}

/// Persistence port for the tree. Implementations may block on I/O and may
/// retry transient faults internally; the engine never retries.
///
/// Concurrent `begin_commit` calls must be serialized by the backend, and
/// pruning must be mutually exclusive with commits touching the same stale
/// boundary.
pub trait JmtStore {
    type Error;
    type Batch<'a>: CommitBatch<Error = Self::Error>
    where
        Self: 'a;

    /// Exact lookup by versioned identity.
    fn get_node(&self, key: &NodeKey) -> Result<Option<Node>, Self::Error>;

    /// Node visible at `version` under `path`: the highest stored version at
    /// or below `version`, skipping entries already superseded at or before
    /// it.
    fn get_node_at(
        &self,
        version: u64,
        path: &NibblePath,
    ) -> Result<Option<(NodeKey, Node)>, Self::Error>;

    /// First node visible at `version` whose path is `>= from` in path
    /// order. Callers filter by prefix to find subtree descendants.
    fn ceiling_node(
        &self,
        version: u64,
        from: &NibblePath,
    ) -> Result<Option<(NodeKey, Node)>, Self::Error>;

    /// Last node visible at `version` whose path is `<= upto` in path order.
    fn floor_node(
        &self,
        version: u64,
        upto: &NibblePath,
    ) -> Result<Option<(NodeKey, Node)>, Self::Error>;

    /// Value at the latest committed version.
    fn get_value(&self, key_hash: &Bytes32) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Value visible at `version`. `None` covers both "never written" and
    /// "deleted at or before `version`"; `get_value_entry_at` tells them
    /// apart.
    fn get_value_at(
        &self,
        key_hash: &Bytes32,
        version: u64,
    ) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Raw value record visible at `version`: the writing version and the
    /// value, with `None` marking a tombstone.
    fn get_value_entry_at(
        &self,
        key_hash: &Bytes32,
        version: u64,
    ) -> Result<Option<(u64, Option<Vec<u8>>)>, Self::Error>;

    /// Root registered for exactly `version`.
    fn root_hash(&self, version: u64) -> Result<Option<Bytes32>, Self::Error>;

    /// Root registered at the highest version at or below `version`.
    fn floor_root(&self, version: u64) -> Result<Option<VersionedRoot>, Self::Error>;

    fn latest_root(&self) -> Result<Option<VersionedRoot>, Self::Error>;

    fn stale_nodes_up_to(&self, version: u64)
        -> Result<Vec<StaleNodeIndex>, Self::Error>;

    /// Opens the exclusive write scope for `version`.
    fn begin_commit(
        &mut self,
        version: u64,
        config: CommitConfig,
    ) -> Result<Self::Batch<'_>, Self::Error>;

    /// Physically removes nodes flagged stale at or before `version` and
    /// returns the number of removed records. Live paths are never touched.
    fn prune_up_to(&mut self, version: u64) -> Result<usize, Self::Error>;

    /// Rollback: discards roots, nodes, stale markings and value history
    /// above `version`.
    fn truncate_after(&mut self, version: u64) -> Result<(), Self::Error>;
}
