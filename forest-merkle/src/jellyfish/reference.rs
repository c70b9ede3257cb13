use crate::{
    common::{
        sum,
        Bytes32,
        NibblePath,
    },
    jellyfish::{
        commitment::CommitmentScheme,
        node::{
            Node,
            NodeKey,
        },
        store::{
            CommitResult,
            ValueOp,
        },
    },
};

use alloc::{
    collections::BTreeMap,
    vec::Vec,
};

#[derive(Debug, Clone, Default)]
struct Snapshot {
    /// Key digest to (value digest, value).
    values: BTreeMap<Bytes32, (Bytes32, Vec<u8>)>,
    node_keys: Vec<NodeKey>,
    root: Bytes32,
}

/// Oracle engine: keeps full materialized snapshots and rebuilds the entire
/// tree from scratch on every commit. Every node is rewritten at the new
/// version and every prior node is superseded, so it trades churn for being
/// trivially correct. Intended for small sets and differential testing.
#[derive(Debug, Default)]
pub(crate) struct ReferenceEngine {
    snapshots: BTreeMap<u64, Snapshot>,
}

impl ReferenceEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn commit<C: CommitmentScheme>(
        &mut self,
        version: u64,
        updates: BTreeMap<Bytes32, Option<Vec<u8>>>,
    ) -> CommitResult {
        let base = self
            .snapshots
            .range(..version)
            .next_back()
            .map(|(_, snapshot)| snapshot.clone())
            .unwrap_or_default();

        let mut values = base.values;
        let mut value_ops = Vec::with_capacity(updates.len());
        for (key_hash, update) in updates {
            match update {
                Some(value) => {
                    values.insert(key_hash, (sum(&value), value.clone()));
                    value_ops.push(ValueOp::Put(key_hash, value));
                }
                None => {
                    if values.remove(&key_hash).is_some() {
                        value_ops.push(ValueOp::Delete(key_hash));
                    }
                }
            }
        }

        let leaves: Vec<(NibblePath, Bytes32, Bytes32)> = values
            .iter()
            .map(|(key_hash, (value_hash, _))| {
                (NibblePath::from_bytes(key_hash), *key_hash, *value_hash)
            })
            .collect();

        let mut nodes = Vec::with_capacity(leaves.len().saturating_mul(2));
        let root_hash = if leaves.is_empty() {
            C::null_hash()
        } else {
            build_subtree::<C>(&leaves, 0, &mut nodes)
        };

        let nodes: Vec<(NodeKey, Node)> = nodes
            .into_iter()
            .map(|(path, node)| (NodeKey::new(version, path), node))
            .collect();
        let snapshot = Snapshot {
            values,
            node_keys: nodes.iter().map(|(key, _)| key.clone()).collect(),
            root: root_hash,
        };
        self.snapshots.insert(version, snapshot);

        CommitResult {
            version,
            root_hash,
            nodes,
            stale: base.node_keys,
            value_ops,
        }
    }

    pub(crate) fn truncate_after(&mut self, version: u64) {
        self.snapshots.retain(|snapshot_version, _| *snapshot_version <= version);
    }
}

/// Builds the fully compressed subtree over `leaves` (sorted by path, all
/// distinct), records every node with its absolute path and returns the
/// subtree commitment anchored after `anchor` consumed nibbles.
fn build_subtree<C: CommitmentScheme>(
    leaves: &[(NibblePath, Bytes32, Bytes32)],
    anchor: usize,
    nodes: &mut Vec<(NibblePath, Node)>,
) -> Bytes32 {
    if let [(path, key_hash, value_hash)] = leaves {
        nodes.push((path.clone(), Node::leaf(*key_hash, *value_hash)));
        return C::commit_leaf(&path.suffix(anchor), value_hash);
    }

    let first = &leaves[0].0;
    let divergence = leaves
        .iter()
        .skip(1)
        .map(|(path, _, _)| first.common_prefix_len(path))
        .min()
        .unwrap_or(first.len());

    let mut children: [Option<Bytes32>; 16] = [None; 16];
    let mut start = 0;
    while start < leaves.len() {
        let nibble = leaves[start].0.nibbles()[divergence];
        let mut end = start + 1;
        while end < leaves.len() && leaves[end].0.nibbles()[divergence] == nibble {
            end += 1;
        }
        children[usize::from(nibble)] =
            Some(build_subtree::<C>(&leaves[start..end], divergence + 1, nodes));
        start = end;
    }

    let branch_path = first.slice(0, divergence);
    let hash = C::commit_branch(&branch_path.suffix(anchor), &children);
    nodes.push((branch_path, Node::internal(&children)));
    hash
}
