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
            JmtStore,
            ValueOp,
        },
    },
};

use alloc::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    vec::Vec,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineError<StorageError> {
    StorageError(StorageError),
    /// A node's bitmap references a subtree with no resolvable root.
    MissingSubtree(NibblePath),
}

impl<StorageError> From<StorageError> for EngineError<StorageError> {
    fn from(err: StorageError) -> Self {
        Self::StorageError(err)
    }
}

/// One traversed internal node, held until the update below it resolves.
struct Frame {
    key: NodeKey,
    children: [Option<Bytes32>; 16],
    child_index: u8,
}

/// Single-pass engine: walks from the committed tree at `base_version`, stages
/// only the nodes along touched paths and never materializes the full key set.
struct WorkingSet<'a, S> {
    store: &'a S,
    base_version: u64,
    new_version: u64,
    /// Nodes (re)written by this commit, keyed by path.
    staged: BTreeMap<NibblePath, Node>,
    /// Committed nodes superseded by this commit.
    stale: BTreeSet<NodeKey>,
}

/// Applies `updates` on top of the tree at `base_version` and assembles the
/// batch for `new_version`. `None` values are deletions; deleting an absent
/// key changes nothing.
pub(crate) fn commit<C, S>(
    store: &S,
    base_version: u64,
    new_version: u64,
    updates: BTreeMap<Bytes32, Option<Vec<u8>>>,
) -> Result<CommitResult, EngineError<S::Error>>
where
    C: CommitmentScheme,
    S: JmtStore,
{
    let mut working = WorkingSet {
        store,
        base_version,
        new_version,
        staged: BTreeMap::new(),
        stale: BTreeSet::new(),
    };
    let mut value_ops = Vec::with_capacity(updates.len());
    for (key_hash, update) in updates {
        match update {
            Some(value) => {
                let value_hash = sum(&value);
                working.apply_put::<C>(key_hash, value_hash)?;
                value_ops.push(ValueOp::Put(key_hash, value));
            }
            None => {
                if working.apply_delete::<C>(&key_hash)? {
                    value_ops.push(ValueOp::Delete(key_hash));
                }
            }
        }
    }
    let root_hash = working.root_hash::<C>()?;
    Ok(CommitResult {
        version: new_version,
        root_hash,
        nodes: working
            .staged
            .into_iter()
            .map(|(path, node)| (NodeKey::new(new_version, path), node))
            .collect(),
        stale: working.stale.into_iter().collect(),
        value_ops,
    })
}

impl<S: JmtStore> WorkingSet<'_, S> {
    /// First visible node at or under `prefix` in path order. Staged nodes
    /// shadow the committed tree; superseded committed nodes are skipped.
    fn descendant(
        &self,
        prefix: &NibblePath,
    ) -> Result<Option<(NodeKey, Node)>, EngineError<S::Error>> {
        let staged = self
            .staged
            .range(prefix.clone()..)
            .next()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, node)| {
                (NodeKey::new(self.new_version, path.clone()), node.clone())
            });
        let mut from = prefix.clone();
        let committed = loop {
            match self.store.ceiling_node(self.base_version, &from)? {
                Some((key, node)) if key.path().starts_with(prefix) => {
                    if self.stale.contains(&key) {
                        // Successor in path order; the subtree below a
                        // superseded node may still be live.
                        from = key.path().child(0);
                        continue;
                    }
                    break Some((key, node));
                }
                _ => break None,
            }
        };
        Ok(match (staged, committed) {
            (Some(staged), Some(committed)) => {
                if staged.0.path() <= committed.0.path() {
                    Some(staged)
                } else {
                    Some(committed)
                }
            }
            (staged, committed) => staged.or(committed),
        })
    }

    fn stage(&mut self, path: NibblePath, node: Node) {
        self.staged.insert(path, node);
    }

    /// Retires the node: staged entries are simply dropped, committed ones
    /// are flagged stale as of this commit.
    fn supersede(&mut self, key: &NodeKey) {
        if key.version() == self.new_version {
            self.staged.remove(key.path());
        } else {
            self.stale.insert(key.clone());
        }
    }

    fn apply_put<C: CommitmentScheme>(
        &mut self,
        key_hash: Bytes32,
        value_hash: Bytes32,
    ) -> Result<(), EngineError<S::Error>> {
        let full = NibblePath::from_bytes(&key_hash);
        let mut frames: Vec<Frame> = Vec::new();
        let mut cursor = self.descendant(&NibblePath::empty())?;
        loop {
            let Some((key, node)) = cursor else {
                // Empty tree or a vacant child slot under the last frame.
                let anchor = frames.last().map(|f| f.key.path().len() + 1).unwrap_or(0);
                let hash = C::commit_leaf(&full.suffix(anchor), &value_hash);
                self.stage(full, Node::leaf(key_hash, value_hash));
                return self.propagate::<C>(frames, Some(hash));
            };
            let divergence = key.path().common_prefix_len(&full);
            if divergence < key.path().len() {
                // The key exits the node's compressed segment partway
                // through. A new branch takes over at the divergence point;
                // the existing node keeps its identity and re-anchors below
                // it with a shorter segment.
                let anchor = frames.last().map(|f| f.key.path().len() + 1).unwrap_or(0);
                let mut children = [None; 16];
                let existing_nibble = key.path().nibbles()[divergence];
                let existing_hash = match &node {
                    Node::Leaf(leaf) => {
                        C::commit_leaf(&key.path().suffix(divergence + 1), leaf.value_hash())
                    }
                    Node::Internal(internal) => C::commit_branch(
                        &key.path().suffix(divergence + 1),
                        &internal.children(),
                    ),
                };
                if node.is_leaf() && key.version() != self.new_version {
                    // Displaced leaves travel with the commit that moved
                    // them, so pruning their old version is always safe.
                    self.stale.insert(key.clone());
                    self.stage(key.path().clone(), node.clone());
                }
                children[usize::from(existing_nibble)] = Some(existing_hash);
                let new_nibble = full.nibbles()[divergence];
                let leaf_hash = C::commit_leaf(&full.suffix(divergence + 1), &value_hash);
                children[usize::from(new_nibble)] = Some(leaf_hash);
                let branch_path = full.slice(0, divergence);
                let branch_hash = C::commit_branch(&branch_path.suffix(anchor), &children);
                self.stage(full, Node::leaf(key_hash, value_hash));
                self.stage(branch_path, Node::internal(&children));
                return self.propagate::<C>(frames, Some(branch_hash));
            }
            match node {
                Node::Leaf(_) => {
                    // Full-length path match means the same key; overwrite.
                    let anchor =
                        frames.last().map(|f| f.key.path().len() + 1).unwrap_or(0);
                    let hash = C::commit_leaf(&full.suffix(anchor), &value_hash);
                    self.supersede(&key);
                    self.stage(full, Node::leaf(key_hash, value_hash));
                    return self.propagate::<C>(frames, Some(hash));
                }
                Node::Internal(internal) => {
                    let nibble = full.nibbles()[key.path().len()];
                    let children = internal.children();
                    let occupied = children[usize::from(nibble)].is_some();
                    let below = key.path().child(nibble);
                    frames.push(Frame {
                        key,
                        children,
                        child_index: nibble,
                    });
                    cursor = if occupied {
                        let found = self
                            .descendant(&below)?
                            .ok_or(EngineError::MissingSubtree(below))?;
                        Some(found)
                    } else {
                        None
                    };
                }
            }
        }
    }

    /// Returns whether the key was present.
    fn apply_delete<C: CommitmentScheme>(
        &mut self,
        key_hash: &Bytes32,
    ) -> Result<bool, EngineError<S::Error>> {
        let full = NibblePath::from_bytes(key_hash);
        let mut frames: Vec<Frame> = Vec::new();
        let mut cursor = self.descendant(&NibblePath::empty())?;
        loop {
            let Some((key, node)) = cursor else {
                return Ok(false);
            };
            let divergence = key.path().common_prefix_len(&full);
            if divergence < key.path().len() {
                return Ok(false);
            }
            match node {
                Node::Leaf(_) => {
                    self.supersede(&key);
                    self.propagate::<C>(frames, None)?;
                    return Ok(true);
                }
                Node::Internal(internal) => {
                    let nibble = full.nibbles()[key.path().len()];
                    let children = internal.children();
                    if children[usize::from(nibble)].is_none() {
                        return Ok(false);
                    }
                    let below = key.path().child(nibble);
                    frames.push(Frame {
                        key,
                        children,
                        child_index: nibble,
                    });
                    let found = self
                        .descendant(&below)?
                        .ok_or(EngineError::MissingSubtree(below))?;
                    cursor = Some(found);
                }
            }
        }
    }

    /// Unwinds the traversal, rewriting each frame with the new child hash.
    /// Branches left with one child collapse into it; the surviving subtree
    /// root re-anchors against the frame above with a longer segment.
    fn propagate<C: CommitmentScheme>(
        &mut self,
        mut frames: Vec<Frame>,
        mut child: Option<Bytes32>,
    ) -> Result<(), EngineError<S::Error>> {
        while let Some(frame) = frames.pop() {
            let mut children = frame.children;
            children[usize::from(frame.child_index)] = child;
            let occupied: Vec<u8> = children
                .iter()
                .enumerate()
                .filter_map(|(slot, hash)| hash.map(|_| slot as u8))
                .collect();
            child = match occupied.as_slice() {
                [] => {
                    self.supersede(&frame.key);
                    None
                }
                [sole] => {
                    self.supersede(&frame.key);
                    let below = frame.key.path().child(*sole);
                    let (survivor_key, survivor) = self
                        .descendant(&below)?
                        .ok_or(EngineError::MissingSubtree(below))?;
                    let anchor =
                        frames.last().map(|f| f.key.path().len() + 1).unwrap_or(0);
                    let hash = match &survivor {
                        Node::Leaf(leaf) => C::commit_leaf(
                            &survivor_key.path().suffix(anchor),
                            leaf.value_hash(),
                        ),
                        Node::Internal(internal) => C::commit_branch(
                            &survivor_key.path().suffix(anchor),
                            &internal.children(),
                        ),
                    };
                    Some(hash)
                }
                _ => {
                    let anchor =
                        frames.last().map(|f| f.key.path().len() + 1).unwrap_or(0);
                    let hash =
                        C::commit_branch(&frame.key.path().suffix(anchor), &children);
                    if frame.key.version() != self.new_version {
                        self.stale.insert(frame.key.clone());
                    }
                    self.stage(frame.key.path().clone(), Node::internal(&children));
                    Some(hash)
                }
            };
        }
        Ok(())
    }

    /// Root commitment of the working tree; the empty tree commits to the
    /// null hash.
    fn root_hash<C: CommitmentScheme>(
        &self,
    ) -> Result<Bytes32, EngineError<S::Error>> {
        let root = match self.descendant(&NibblePath::empty())? {
            None => C::null_hash(),
            Some((key, Node::Leaf(leaf))) => {
                C::commit_leaf(key.path(), leaf.value_hash())
            }
            Some((key, Node::Internal(internal))) => {
                C::commit_branch(key.path(), &internal.children())
            }
        };
        Ok(root)
    }
}
