use crate::{
    common::{
        sum,
        Bytes32,
        NibblePath,
    },
    jellyfish::{
        commitment::{
            CommitmentScheme,
            Mpf,
        },
        node::{
            Node,
            NodeKey,
        },
        proof::{
            BranchStep,
            ForkStep,
            InclusionProof,
            JmtProof,
            NonInclusionEmptyProof,
            NonInclusionLeafProof,
            StepNeighbor,
        },
        reference::ReferenceEngine,
        store::{
            CommitBatch,
            CommitConfig,
            CommitResult,
            JmtStore,
            Retention,
            ValueOp,
            VersionedRoot,
        },
        streaming,
    },
    mpf,
};

use alloc::{
    collections::BTreeMap,
    vec::Vec,
};
use core::marker::PhantomData;
use hashbrown::{
    HashMap,
    HashSet,
};
use spin::RwLock;

#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum MerkleTreeError<StorageError> {
    #[display(
        fmt = "commit version {} does not advance past the latest committed version {}",
        _0,
        _1
    )]
    OrderingViolation(u64, u64),
    #[display(fmt = "version {} has no committed root", _0)]
    UnknownVersion(u64),
    #[display(fmt = "live path references an unresolvable subtree under {:?}", _0)]
    StoreInconsistency(NibblePath),
    #[display(fmt = "{}", _0)]
    StorageError(StorageError),
}

impl<StorageError> From<StorageError> for MerkleTreeError<StorageError> {
    fn from(err: StorageError) -> Self {
        Self::StorageError(err)
    }
}

/// Which commit engine backs `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    /// Full in-memory rebuild per commit. Permissive about version order;
    /// meant for small sets and differential testing.
    Reference,
    /// Path-only commits against the store. Versions must strictly increase.
    #[default]
    Streaming,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    pub engine: EngineMode,
    pub retention: Retention,
    pub node_cache_capacity: usize,
    pub value_cache_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            engine: EngineMode::default(),
            retention: Retention::default(),
            node_cache_capacity: 4096,
            value_cache_capacity: 1024,
        }
    }
}

/// What a `prune_up_to` actually did, including its cache fallout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub version: u64,
    pub records_pruned: usize,
    pub cache_evicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
struct Caches {
    /// Ceiling queries `(version, prefix)` to their resolved descendant;
    /// `None` entries record confirmed absence.
    nodes: HashMap<NodeKey, Option<(NodeKey, Node)>>,
    values: HashMap<(Bytes32, u64), Option<Vec<u8>>>,
    stats: CacheStats,
}

fn insert_bounded<K, V>(map: &mut HashMap<K, V>, capacity: usize, key: K, value: V)
where
    K: Eq + core::hash::Hash + Clone,
{
    if capacity == 0 {
        return;
    }
    if map.len() >= capacity && !map.contains_key(&key) {
        if let Some(evicted) = map.keys().next().cloned() {
            map.remove(&evicted);
        }
    }
    map.insert(key, value);
}

/// Versioned authenticated key-value index over a [`JmtStore`], generic over
/// the commitment scheme. Owns a bounded read cache that is invalidated
/// synchronously on prune and truncate.
#[derive(Debug)]
pub struct JellyfishMerkleTree<CommitmentType, StorageType> {
    storage: StorageType,
    config: TreeConfig,
    reference: Option<ReferenceEngine>,
    caches: RwLock<Caches>,
    phantom: PhantomData<CommitmentType>,
}

impl<CommitmentType, StorageType> JellyfishMerkleTree<CommitmentType, StorageType> {
    pub fn new(storage: StorageType, config: TreeConfig) -> Self {
        let reference = match config.engine {
            EngineMode::Reference => Some(ReferenceEngine::new()),
            EngineMode::Streaming => None,
        };
        Self {
            storage,
            config,
            reference,
            caches: RwLock::new(Caches::default()),
            phantom: PhantomData,
        }
    }

    pub fn storage(&self) -> &StorageType {
        &self.storage
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.caches.read().stats
    }
}

impl<C, S> JellyfishMerkleTree<C, S>
where
    C: CommitmentScheme,
    S: JmtStore,
{
    /// Commits `updates` as the tree state at `version`. `None` values are
    /// tombstones. Later duplicates of a key win within one call.
    pub fn put<K, V, I>(
        &mut self,
        version: u64,
        updates: I,
    ) -> Result<CommitResult, MerkleTreeError<S::Error>>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: AsRef<[u8]>,
        V: Into<Vec<u8>>,
    {
        let updates: BTreeMap<Bytes32, Option<Vec<u8>>> = updates
            .into_iter()
            .map(|(key, value)| (sum(key.as_ref()), value.map(Into::into)))
            .collect();
        let latest = self.storage.latest_root()?;

        let result = match &mut self.reference {
            Some(engine) => {
                if self.storage.root_hash(version)?.is_some() {
                    let latest = latest.map(|root| root.version).unwrap_or(version);
                    return Err(MerkleTreeError::OrderingViolation(version, latest));
                }
                engine.commit::<C>(version, updates)
            }
            None => {
                if let Some(latest) = &latest {
                    if version <= latest.version {
                        return Err(MerkleTreeError::OrderingViolation(
                            version,
                            latest.version,
                        ));
                    }
                }
                let base = latest.map(|root| root.version).unwrap_or(0);
                streaming::commit::<C, S>(&self.storage, base, version, updates)
                    .map_err(|err| match err {
                        streaming::EngineError::StorageError(err) => {
                            MerkleTreeError::StorageError(err)
                        }
                        streaming::EngineError::MissingSubtree(path) => {
                            MerkleTreeError::StoreInconsistency(path)
                        }
                    })?
            }
        };

        let config = CommitConfig {
            retention: self.config.retention,
        };
        let mut batch = self.storage.begin_commit(version, config)?;
        for (key, node) in &result.nodes {
            batch.put_node(key.clone(), node.clone());
        }
        for key in &result.stale {
            batch.mark_stale(key.clone());
        }
        for op in &result.value_ops {
            match op {
                ValueOp::Put(key_hash, value) => batch.put_value(*key_hash, value.clone()),
                ValueOp::Delete(key_hash) => batch.delete_value(*key_hash),
            }
        }
        batch.set_root_hash(result.root_hash);
        batch.commit()?;

        if self.reference.is_some() {
            // Interleaved versions invalidate cached floor resolutions.
            let mut caches = self.caches.write();
            caches.nodes.clear();
            caches.values.clear();
        }
        tracing::debug!(
            version,
            nodes = result.nodes.len(),
            stale = result.stale.len(),
            "committed"
        );
        Ok(result)
    }

    /// Value at the latest committed version; `None` before any commit.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MerkleTreeError<S::Error>> {
        match self.storage.latest_root()? {
            None => Ok(None),
            Some(latest) => self.get_at(key, latest.version),
        }
    }

    pub fn get_at(
        &self,
        key: &[u8],
        version: u64,
    ) -> Result<Option<Vec<u8>>, MerkleTreeError<S::Error>> {
        self.require_version(version)?;
        let key_hash = sum(key);
        {
            let mut caches = self.caches.write();
            if let Some(value) = caches.values.get(&(key_hash, version)).cloned() {
                caches.stats.hits = caches.stats.hits.saturating_add(1);
                return Ok(value);
            }
            caches.stats.misses = caches.stats.misses.saturating_add(1);
        }
        let value = self.storage.get_value_at(&key_hash, version)?;
        let mut caches = self.caches.write();
        insert_bounded(
            &mut caches.values,
            self.config.value_cache_capacity,
            (key_hash, version),
            value.clone(),
        );
        Ok(value)
    }

    /// Root registered for exactly `version`.
    pub fn root_hash(&self, version: u64) -> Result<Bytes32, MerkleTreeError<S::Error>> {
        self.storage
            .root_hash(version)?
            .ok_or(MerkleTreeError::UnknownVersion(version))
    }

    pub fn latest_root(
        &self,
    ) -> Result<Option<VersionedRoot>, MerkleTreeError<S::Error>> {
        Ok(self.storage.latest_root()?)
    }

    /// Inclusion or non-inclusion proof for `key` against the tree at
    /// `version`, built from a single root-to-leaf walk.
    pub fn get_proof(
        &self,
        key: &[u8],
        version: u64,
    ) -> Result<JmtProof, MerkleTreeError<S::Error>> {
        self.require_version(version)?;
        let key_hash = sum(key);
        let full = NibblePath::from_bytes(&key_hash);
        let mut steps: Vec<BranchStep> = Vec::new();
        let mut anchor = 0usize;
        let mut cursor = self.resolve_descendant(version, &NibblePath::empty())?;
        loop {
            let Some((node_key, node)) = cursor else {
                return Ok(JmtProof::NonInclusionEmpty(NonInclusionEmptyProof {
                    steps,
                    fork: None,
                }));
            };
            let path = node_key.path().clone();
            let divergence = path.common_prefix_len(&full);
            if divergence < path.len() {
                // The key leaves the node's compressed segment partway in.
                return Ok(match node {
                    Node::Leaf(leaf) => {
                        JmtProof::NonInclusionDifferentLeaf(NonInclusionLeafProof {
                            steps,
                            leaf_key_hash: *leaf.key_hash(),
                            leaf_value_hash: *leaf.value_hash(),
                        })
                    }
                    Node::Internal(internal) => {
                        JmtProof::NonInclusionEmpty(NonInclusionEmptyProof {
                            steps,
                            fork: Some(ForkStep {
                                skip: path.slice(anchor, divergence),
                                nibble: path.nibbles()[divergence],
                                prefix: path.suffix(divergence + 1),
                                children: internal.children(),
                            }),
                        })
                    }
                });
            }
            match node {
                Node::Leaf(leaf) => {
                    return Ok(JmtProof::Inclusion(InclusionProof {
                        steps,
                        value_hash: *leaf.value_hash(),
                    }));
                }
                Node::Internal(internal) => {
                    let nibble = full.nibbles()[path.len()];
                    let children = internal.children();
                    let neighbor =
                        self.step_neighbor(version, &path, &children, nibble)?;
                    let occupied = children[usize::from(nibble)].is_some();
                    steps.push(BranchStep {
                        skip: path.suffix(anchor),
                        children,
                        child_index: nibble,
                        neighbor,
                    });
                    anchor = path.len() + 1;
                    if occupied {
                        let below = path.child(nibble);
                        let found = self
                            .resolve_descendant(version, &below)?
                            .ok_or(MerkleTreeError::StoreInconsistency(below))?;
                        cursor = Some(found);
                    } else {
                        return Ok(JmtProof::NonInclusionEmpty(
                            NonInclusionEmptyProof { steps, fork: None },
                        ));
                    }
                }
            }
        }
    }

    /// Drops everything flagged stale at or before `version` and reports
    /// both store and cache effects.
    pub fn prune_up_to(
        &mut self,
        version: u64,
    ) -> Result<PruneReport, MerkleTreeError<S::Error>> {
        let stale = self.storage.stale_nodes_up_to(version)?;
        let records_pruned = self.storage.prune_up_to(version)?;
        let pruned: HashSet<NodeKey> =
            stale.into_iter().map(|index| index.node_key).collect();

        let mut caches = self.caches.write();
        let before = caches.nodes.len() + caches.values.len();
        caches.nodes.retain(|_, found| match found {
            Some((key, _)) => !pruned.contains(key),
            None => true,
        });
        if self.config.retention == Retention::Aggressive {
            caches
                .values
                .retain(|(_, value_version), _| *value_version > version);
        }
        let cache_evicted =
            before.saturating_sub(caches.nodes.len() + caches.values.len());
        drop(caches);

        tracing::debug!(version, records_pruned, cache_evicted, "pruned");
        Ok(PruneReport {
            version,
            records_pruned,
            cache_evicted,
        })
    }

    /// Rollback to `version`: discards all later roots, nodes and value
    /// history, then drops every cache entry.
    pub fn truncate_after(
        &mut self,
        version: u64,
    ) -> Result<(), MerkleTreeError<S::Error>> {
        self.storage.truncate_after(version)?;
        if let Some(engine) = &mut self.reference {
            engine.truncate_after(version);
        }
        let mut caches = self.caches.write();
        caches.nodes.clear();
        caches.values.clear();
        drop(caches);
        tracing::debug!(version, "truncated");
        Ok(())
    }

    fn require_version(&self, version: u64) -> Result<(), MerkleTreeError<S::Error>> {
        match self.storage.latest_root()? {
            Some(latest) if version <= latest.version => Ok(()),
            _ => Err(MerkleTreeError::UnknownVersion(version)),
        }
    }

    /// First node at or under `prefix` visible at `version`, via the cache.
    fn resolve_descendant(
        &self,
        version: u64,
        prefix: &NibblePath,
    ) -> Result<Option<(NodeKey, Node)>, MerkleTreeError<S::Error>> {
        let cache_key = NodeKey::new(version, prefix.clone());
        {
            let mut caches = self.caches.write();
            if let Some(found) = caches.nodes.get(&cache_key).cloned() {
                caches.stats.hits = caches.stats.hits.saturating_add(1);
                return Ok(found);
            }
            caches.stats.misses = caches.stats.misses.saturating_add(1);
        }
        let found = self
            .storage
            .ceiling_node(version, prefix)?
            .filter(|(key, _)| key.path().starts_with(prefix));
        let mut caches = self.caches.write();
        insert_bounded(
            &mut caches.nodes,
            self.config.node_cache_capacity,
            cache_key,
            found.clone(),
        );
        Ok(found)
    }

    /// The lone sibling next to the traversed slot, when the branch holds
    /// exactly two children and one of them is on the path.
    fn step_neighbor(
        &self,
        version: u64,
        path: &NibblePath,
        children: &[Option<Bytes32>; 16],
        nibble: u8,
    ) -> Result<Option<StepNeighbor>, MerkleTreeError<S::Error>> {
        let occupied: Vec<u8> = children
            .iter()
            .enumerate()
            .filter_map(|(slot, hash)| hash.map(|_| slot as u8))
            .collect();
        if occupied.len() != 2 || children[usize::from(nibble)].is_none() {
            return Ok(None);
        }
        let Some(sibling_nibble) = occupied.into_iter().find(|slot| *slot != nibble)
        else {
            return Ok(None);
        };
        let below = path.child(sibling_nibble);
        let (sibling_key, sibling) = self
            .resolve_descendant(version, &below)?
            .ok_or(MerkleTreeError::StoreInconsistency(below))?;
        Ok(Some(match sibling {
            Node::Leaf(leaf) => StepNeighbor::Leaf {
                nibble: sibling_nibble,
                key_hash: *leaf.key_hash(),
                value_hash: *leaf.value_hash(),
            },
            Node::Internal(internal) => StepNeighbor::Internal {
                nibble: sibling_nibble,
                prefix: sibling_key.path().suffix(path.len() + 1),
                children: internal.children(),
            },
        }))
    }
}

impl<S> JellyfishMerkleTree<Mpf, S>
where
    S: JmtStore,
{
    /// CBOR wire encoding of the proof for `key` at `version`, compatible
    /// with the external binary-hash verifier.
    pub fn get_proof_wire(
        &self,
        key: &[u8],
        version: u64,
    ) -> Result<Vec<u8>, MerkleTreeError<S::Error>> {
        let proof = self.get_proof(key, version)?;
        let key_path = NibblePath::from_bytes(&sum(key));
        Ok(mpf::wire::encode(&proof, &key_path))
    }

    /// Decodes and checks a wire proof against `root`. `Some(value)` asks
    /// for inclusion, `None` for non-inclusion.
    pub fn verify_proof_wire(
        root: &Bytes32,
        key: &[u8],
        value: Option<&[u8]>,
        wire: &[u8],
    ) -> Result<bool, mpf::WireError> {
        mpf::verify_wire(root, key, value, wire)
    }
}
