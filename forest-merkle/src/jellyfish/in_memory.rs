use crate::{
    common::{
        Bytes32,
        NibblePath,
    },
    jellyfish::{
        node::{
            Node,
            NodeKey,
        },
        store::{
            CommitBatch,
            CommitConfig,
            JmtStore,
            Retention,
            StaleNodeIndex,
            ValueOp,
            VersionedRoot,
        },
    },
    storage::{
        Mappable,
        StorageAsRef,
        StorageInspect,
    },
};

use alloc::{
    borrow::Cow,
    collections::{
        BTreeMap,
        BTreeSet,
    },
    vec::Vec,
};
use core::convert::Infallible;
use hashbrown::HashMap;

/// The table of tree nodes, addressed by versioned identity.
#[derive(Debug, Clone)]
pub struct NodesTable;

impl Mappable for NodesTable {
    type Key = Self::OwnedKey;
    type OwnedKey = NodeKey;
    type OwnedValue = Node;
    type Value = Self::OwnedValue;
}

/// The table of latest value records per key digest.
#[derive(Debug, Clone)]
pub struct ValuesTable;

impl Mappable for ValuesTable {
    type Key = Self::OwnedKey;
    type OwnedKey = Bytes32;
    type OwnedValue = (u64, Option<Vec<u8>>);
    type Value = Self::OwnedValue;
}

/// Auxiliary table holding the latest committed root.
#[derive(Debug, Clone)]
pub struct LatestRootTable;

impl Mappable for LatestRootTable {
    type Key = Self::OwnedKey;
    type OwnedKey = ();
    type OwnedValue = VersionedRoot;
    type Value = Self::OwnedValue;
}

/// Reference store: ordered maps with full floor/ceiling support, explicit
/// tombstones in the value history, a stale-node index and a version to root
/// registry. All operations are infallible.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    /// Per-path version history of nodes.
    nodes: BTreeMap<NibblePath, BTreeMap<u64, Node>>,
    /// Ordered by (stale_since_version, node_key) for range pruning.
    stale: BTreeSet<StaleNodeIndex>,
    /// NodeKey to the version that superseded it.
    stale_since: HashMap<NodeKey, u64>,
    /// Per-key version history; `None` is a tombstone.
    values: BTreeMap<Bytes32, BTreeMap<u64, Option<Vec<u8>>>>,
    roots: BTreeMap<u64, Bytes32>,
    retention: Retention,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of live node records, across every path and version.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn node_count(&self) -> usize {
        self.nodes.values().map(BTreeMap::len).sum()
    }

    /// The number of records marked stale but not yet pruned.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    /// Resolves the version history under `path` at `version`, honoring
    /// stale markings.
    fn visible_at(&self, version: u64, path: &NibblePath) -> Option<(NodeKey, Node)> {
        let versions = self.nodes.get(path)?;
        let (found, node) = versions.range(..=version).next_back()?;
        let key = NodeKey::new(*found, path.clone());
        if let Some(since) = self.stale_since.get(&key) {
            if *since <= version {
                return None;
            }
        }
        Some((key, node.clone()))
    }
}

impl StorageInspect<NodesTable> for InMemoryStore {
    type Error = Infallible;

    fn get(&self, key: &NodeKey) -> Result<Option<Cow<'_, Node>>, Self::Error> {
        let node = self
            .nodes
            .get(key.path())
            .and_then(|versions| versions.get(&key.version()))
            .map(Cow::Borrowed);
        Ok(node)
    }

    fn contains_key(&self, key: &NodeKey) -> Result<bool, Self::Error> {
        let contains = self
            .nodes
            .get(key.path())
            .is_some_and(|versions| versions.contains_key(&key.version()));
        Ok(contains)
    }
}

impl StorageInspect<ValuesTable> for InMemoryStore {
    type Error = Infallible;

    fn get(
        &self,
        key: &Bytes32,
    ) -> Result<Option<Cow<'_, (u64, Option<Vec<u8>>)>>, Self::Error> {
        let entry = self
            .values
            .get(key)
            .and_then(|history| history.iter().next_back())
            .map(|(version, value)| Cow::Owned((*version, value.clone())));
        Ok(entry)
    }

    fn contains_key(&self, key: &Bytes32) -> Result<bool, Self::Error> {
        Ok(self.values.contains_key(key))
    }
}

impl StorageInspect<LatestRootTable> for InMemoryStore {
    type Error = Infallible;

    fn get(&self, _key: &()) -> Result<Option<Cow<'_, VersionedRoot>>, Self::Error> {
        let latest = self
            .roots
            .iter()
            .next_back()
            .map(|(version, root)| Cow::Owned(VersionedRoot {
                version: *version,
                root: *root,
            }));
        Ok(latest)
    }

    fn contains_key(&self, _key: &()) -> Result<bool, Self::Error> {
        Ok(!self.roots.is_empty())
    }
}

/// Write scope over the in-memory store. Everything is buffered in the batch
/// value; dropping it without `commit` leaves the store untouched.
pub struct InMemoryCommitBatch<'a> {
    store: &'a mut InMemoryStore,
    version: u64,
    config: CommitConfig,
    nodes: Vec<(NodeKey, Node)>,
    stale: Vec<NodeKey>,
    value_ops: Vec<ValueOp>,
    root: Option<Bytes32>,
}

impl CommitBatch for InMemoryCommitBatch<'_> {
    type Error = Infallible;

    fn put_node(&mut self, key: NodeKey, node: Node) {
        self.nodes.push((key, node));
    }

    fn mark_stale(&mut self, key: NodeKey) {
        self.stale.push(key);
    }

    fn put_value(&mut self, key_hash: Bytes32, value: Vec<u8>) {
        self.value_ops.push(ValueOp::Put(key_hash, value));
    }

    fn delete_value(&mut self, key_hash: Bytes32) {
        self.value_ops.push(ValueOp::Delete(key_hash));
    }

    fn set_root_hash(&mut self, root: Bytes32) {
        self.root = Some(root);
    }

    fn commit(self) -> Result<(), Self::Error> {
        let store = self.store;
        for (key, node) in self.nodes {
            store
                .nodes
                .entry(key.path().clone())
                .or_default()
                .insert(key.version(), node);
        }
        for key in self.stale {
            store.stale_since.insert(key.clone(), self.version);
            store.stale.insert(StaleNodeIndex {
                stale_since_version: self.version,
                node_key: key,
            });
        }
        for op in self.value_ops {
            match op {
                ValueOp::Put(key_hash, value) => {
                    store
                        .values
                        .entry(key_hash)
                        .or_default()
                        .insert(self.version, Some(value));
                }
                ValueOp::Delete(key_hash) => {
                    store
                        .values
                        .entry(key_hash)
                        .or_default()
                        .insert(self.version, None);
                }
            }
        }
        if let Some(root) = self.root {
            store.roots.insert(self.version, root);
        }
        store.retention = self.config.retention;
        Ok(())
    }
}

impl JmtStore for InMemoryStore {
    type Error = Infallible;
    type Batch<'a> = InMemoryCommitBatch<'a>;

    fn get_node(&self, key: &NodeKey) -> Result<Option<Node>, Self::Error> {
        let node = self
            .storage::<NodesTable>()
            .get(key)?
            .map(Cow::into_owned);
        Ok(node)
    }

    fn get_node_at(
        &self,
        version: u64,
        path: &NibblePath,
    ) -> Result<Option<(NodeKey, Node)>, Self::Error> {
        Ok(self.visible_at(version, path))
    }

    fn ceiling_node(
        &self,
        version: u64,
        from: &NibblePath,
    ) -> Result<Option<(NodeKey, Node)>, Self::Error> {
        for path in self.nodes.range(from.clone()..).map(|(path, _)| path) {
            if let Some(found) = self.visible_at(version, path) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn floor_node(
        &self,
        version: u64,
        upto: &NibblePath,
    ) -> Result<Option<(NodeKey, Node)>, Self::Error> {
        for path in self
            .nodes
            .range(..=upto.clone())
            .rev()
            .map(|(path, _)| path)
        {
            if let Some(found) = self.visible_at(version, path) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn get_value(&self, key_hash: &Bytes32) -> Result<Option<Vec<u8>>, Self::Error> {
        let value = self
            .storage::<ValuesTable>()
            .get(key_hash)?
            .and_then(|entry| entry.into_owned().1);
        Ok(value)
    }

    fn get_value_at(
        &self,
        key_hash: &Bytes32,
        version: u64,
    ) -> Result<Option<Vec<u8>>, Self::Error> {
        let value = self
            .get_value_entry_at(key_hash, version)?
            .and_then(|(_, value)| value);
        Ok(value)
    }

    fn get_value_entry_at(
        &self,
        key_hash: &Bytes32,
        version: u64,
    ) -> Result<Option<(u64, Option<Vec<u8>>)>, Self::Error> {
        let entry = self
            .values
            .get(key_hash)
            .and_then(|history| history.range(..=version).next_back())
            .map(|(found, value)| (*found, value.clone()));
        Ok(entry)
    }

    fn root_hash(&self, version: u64) -> Result<Option<Bytes32>, Self::Error> {
        Ok(self.roots.get(&version).copied())
    }

    fn floor_root(&self, version: u64) -> Result<Option<VersionedRoot>, Self::Error> {
        let root = self
            .roots
            .range(..=version)
            .next_back()
            .map(|(version, root)| VersionedRoot {
                version: *version,
                root: *root,
            });
        Ok(root)
    }

    fn latest_root(&self) -> Result<Option<VersionedRoot>, Self::Error> {
        let latest = self
            .storage::<LatestRootTable>()
            .get(&())?
            .map(Cow::into_owned);
        Ok(latest)
    }

    fn stale_nodes_up_to(
        &self,
        version: u64,
    ) -> Result<Vec<StaleNodeIndex>, Self::Error> {
        let stale = self
            .stale
            .iter()
            .take_while(|index| index.stale_since_version <= version)
            .cloned()
            .collect();
        Ok(stale)
    }

    fn begin_commit(
        &mut self,
        version: u64,
        config: CommitConfig,
    ) -> Result<Self::Batch<'_>, Self::Error> {
        Ok(InMemoryCommitBatch {
            store: self,
            version,
            config,
            nodes: Vec::new(),
            stale: Vec::new(),
            value_ops: Vec::new(),
            root: None,
        })
    }

    fn prune_up_to(&mut self, version: u64) -> Result<usize, Self::Error> {
        let mut removed = 0usize;
        let pruned: Vec<StaleNodeIndex> = self
            .stale
            .iter()
            .take_while(|index| index.stale_since_version <= version)
            .cloned()
            .collect();
        for index in pruned {
            let key = &index.node_key;
            if let Some(versions) = self.nodes.get_mut(key.path()) {
                if versions.remove(&key.version()).is_some() {
                    removed = removed.saturating_add(1);
                }
                if versions.is_empty() {
                    self.nodes.remove(key.path());
                }
            }
            self.stale_since.remove(key);
            self.stale.remove(&index);
        }
        if self.retention == Retention::Aggressive {
            removed = removed.saturating_add(self.drop_value_history(version));
        }
        Ok(removed)
    }

    fn truncate_after(&mut self, version: u64) -> Result<(), Self::Error> {
        self.roots.retain(|root_version, _| *root_version <= version);
        self.nodes.retain(|_, versions| {
            versions.retain(|node_version, _| *node_version <= version);
            !versions.is_empty()
        });
        self.stale
            .retain(|index| index.stale_since_version <= version);
        self.stale_since.retain(|_, since| *since <= version);
        self.values.retain(|_, history| {
            history.retain(|value_version, _| *value_version <= version);
            !history.is_empty()
        });
        Ok(())
    }
}

impl InMemoryStore {
    /// Under aggressive retention, history at or below the prune bound
    /// collapses to the single record still visible there; a key whose
    /// visible record is a tombstone loses its history entirely.
    fn drop_value_history(&mut self, version: u64) -> usize {
        let mut removed = 0usize;
        self.values.retain(|_, history| {
            let keep_from = history
                .range(..=version)
                .next_back()
                .filter(|(_, value)| value.is_some())
                .map(|(found, _)| *found);
            history.retain(|value_version, _| {
                let keep = *value_version > version || Some(*value_version) == keep_from;
                if !keep {
                    removed = removed.saturating_add(1);
                }
                keep
            });
            !history.is_empty()
        });
        removed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::sum;
    use pretty_assertions::assert_eq;

    fn path(nibbles: &[u8]) -> NibblePath {
        NibblePath::from_nibbles(nibbles).unwrap()
    }

    fn leaf(fill: u8) -> Node {
        Node::leaf([fill; 32], [fill; 32])
    }

    fn commit_single(
        store: &mut InMemoryStore,
        version: u64,
        node_path: NibblePath,
        node: Node,
        root: Bytes32,
    ) {
        let mut batch = store.begin_commit(version, CommitConfig::default()).unwrap();
        batch.put_node(NodeKey::new(version, node_path), node);
        batch.set_root_hash(root);
        batch.commit().unwrap();
    }

    #[test]
    fn get_node_at__returns_floor_version() {
        let mut store = InMemoryStore::new();
        commit_single(&mut store, 0, path(&[0x01]), leaf(1), [1; 32]);
        commit_single(&mut store, 5, path(&[0x01]), leaf(2), [2; 32]);

        let (key, node) = store.get_node_at(3, &path(&[0x01])).unwrap().unwrap();
        assert_eq!(key.version(), 0);
        assert_eq!(node, leaf(1));

        let (key, _) = store.get_node_at(5, &path(&[0x01])).unwrap().unwrap();
        assert_eq!(key.version(), 5);
    }

    #[test]
    fn get_node_at__skips_entries_stale_at_or_before_version() {
        let mut store = InMemoryStore::new();
        commit_single(&mut store, 0, path(&[0x01]), leaf(1), [1; 32]);

        let mut batch = store.begin_commit(4, CommitConfig::default()).unwrap();
        batch.mark_stale(NodeKey::new(0, path(&[0x01])));
        batch.set_root_hash([0; 32]);
        batch.commit().unwrap();

        assert!(store.get_node_at(3, &path(&[0x01])).unwrap().is_some());
        assert!(store.get_node_at(4, &path(&[0x01])).unwrap().is_none());
    }

    #[test]
    fn abandoned_batch__leaves_store_unchanged() {
        let mut store = InMemoryStore::new();
        commit_single(&mut store, 0, path(&[0x01]), leaf(1), [1; 32]);

        {
            let mut batch = store.begin_commit(1, CommitConfig::default()).unwrap();
            batch.put_node(NodeKey::new(1, path(&[0x02])), leaf(2));
            batch.put_value(sum(b"key"), b"value".to_vec());
            batch.mark_stale(NodeKey::new(0, path(&[0x01])));
            batch.set_root_hash([9; 32]);
            // dropped without commit
        }

        assert_eq!(store.latest_root().unwrap().unwrap().version, 0);
        assert_eq!(store.root_hash(1).unwrap(), None);
        assert_eq!(store.node_count(), 1);
        assert_eq!(store.stale_count(), 0);
        assert_eq!(store.get_value(&sum(b"key")).unwrap(), None);
    }

    #[test]
    fn value_history__tombstone_is_distinguishable_from_missing() {
        let mut store = InMemoryStore::new();
        let key_hash = sum(b"alice");

        let mut batch = store.begin_commit(0, CommitConfig::default()).unwrap();
        batch.put_value(key_hash, b"100".to_vec());
        batch.set_root_hash([1; 32]);
        batch.commit().unwrap();

        let mut batch = store.begin_commit(1, CommitConfig::default()).unwrap();
        batch.delete_value(key_hash);
        batch.set_root_hash([2; 32]);
        batch.commit().unwrap();

        assert_eq!(store.get_value_at(&key_hash, 0).unwrap(), Some(b"100".to_vec()));
        assert_eq!(store.get_value_at(&key_hash, 1).unwrap(), None);
        // Deleted at version 1: the tombstone record remains observable.
        assert_eq!(store.get_value_entry_at(&key_hash, 1).unwrap(), Some((1, None)));
        // Never written at all: no record.
        assert_eq!(store.get_value_entry_at(&sum(b"bob"), 1).unwrap(), None);
    }

    #[test]
    fn ceiling_node__finds_first_descendant_in_path_order() {
        let mut store = InMemoryStore::new();
        commit_single(&mut store, 0, path(&[0x02, 0x01]), leaf(1), [1; 32]);
        commit_single(&mut store, 1, path(&[0x02]), leaf(2), [2; 32]);

        let (key, _) = store.ceiling_node(1, &path(&[0x02])).unwrap().unwrap();
        assert_eq!(key.path(), &path(&[0x02]));

        let (key, _) = store.ceiling_node(1, &path(&[0x02, 0x00])).unwrap().unwrap();
        assert_eq!(key.path(), &path(&[0x02, 0x01]));
    }

    #[test]
    fn floor_node__finds_last_node_at_or_before_the_path() {
        let mut store = InMemoryStore::new();
        commit_single(&mut store, 0, path(&[0x02]), leaf(1), [1; 32]);
        commit_single(&mut store, 1, path(&[0x05]), leaf(2), [2; 32]);

        let (key, _) = store.floor_node(1, &path(&[0x04])).unwrap().unwrap();
        assert_eq!(key.path(), &path(&[0x02]));
        assert!(store.floor_node(1, &path(&[0x01])).unwrap().is_none());
    }

    #[test]
    fn floor_root__resolves_the_nearest_committed_version() {
        let mut store = InMemoryStore::new();
        commit_single(&mut store, 2, path(&[0x01]), leaf(1), [1; 32]);
        commit_single(&mut store, 7, path(&[0x01]), leaf(2), [2; 32]);

        assert!(store.floor_root(1).unwrap().is_none());
        assert_eq!(store.floor_root(5).unwrap().unwrap().version, 2);
        assert_eq!(store.floor_root(7).unwrap().unwrap().root, [2; 32]);
    }

    #[test]
    fn prune_up_to__removes_only_stale_flagged_nodes() {
        let mut store = InMemoryStore::new();
        commit_single(&mut store, 0, path(&[0x01]), leaf(1), [1; 32]);

        let mut batch = store.begin_commit(1, CommitConfig::default()).unwrap();
        batch.put_node(NodeKey::new(1, path(&[0x01])), leaf(2));
        batch.mark_stale(NodeKey::new(0, path(&[0x01])));
        batch.set_root_hash([2; 32]);
        batch.commit().unwrap();

        let removed = store.prune_up_to(1).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_node(&NodeKey::new(0, path(&[0x01]))).unwrap(), None);
        assert_eq!(store.get_node(&NodeKey::new(1, path(&[0x01]))).unwrap(), Some(leaf(2)));
        assert_eq!(store.stale_count(), 0);
    }

    #[test]
    fn truncate_after__rolls_back_roots_nodes_and_values() {
        let mut store = InMemoryStore::new();
        let key_hash = sum(b"alice");

        let mut batch = store.begin_commit(0, CommitConfig::default()).unwrap();
        batch.put_node(NodeKey::new(0, path(&[0x01])), leaf(1));
        batch.put_value(key_hash, b"100".to_vec());
        batch.set_root_hash([1; 32]);
        batch.commit().unwrap();

        let mut batch = store.begin_commit(1, CommitConfig::default()).unwrap();
        batch.put_node(NodeKey::new(1, path(&[0x01])), leaf(2));
        batch.mark_stale(NodeKey::new(0, path(&[0x01])));
        batch.put_value(key_hash, b"150".to_vec());
        batch.set_root_hash([2; 32]);
        batch.commit().unwrap();

        store.truncate_after(0).unwrap();

        assert_eq!(store.latest_root().unwrap().unwrap().version, 0);
        assert_eq!(store.get_value(&key_hash).unwrap(), Some(b"100".to_vec()));
        // The stale marking from the discarded version is gone; version 0 is
        // fully live again.
        assert_eq!(store.stale_count(), 0);
        let (key, _) = store.get_node_at(0, &path(&[0x01])).unwrap().unwrap();
        assert_eq!(key.version(), 0);
    }

    #[test]
    fn prune_up_to__aggressive_retention_drops_shadowed_value_history() {
        let mut store = InMemoryStore::new();
        let key_hash = sum(b"alice");

        let mut batch = store
            .begin_commit(0, CommitConfig { retention: Retention::Aggressive })
            .unwrap();
        batch.put_value(key_hash, b"100".to_vec());
        batch.set_root_hash([1; 32]);
        batch.commit().unwrap();

        let mut batch = store
            .begin_commit(1, CommitConfig { retention: Retention::Aggressive })
            .unwrap();
        batch.put_value(key_hash, b"150".to_vec());
        batch.set_root_hash([2; 32]);
        batch.commit().unwrap();

        let removed = store.prune_up_to(1).unwrap();
        assert_eq!(removed, 1);
        // The record visible at the prune bound survives.
        assert_eq!(store.get_value_at(&key_hash, 1).unwrap(), Some(b"150".to_vec()));
        assert_eq!(store.get_value_entry_at(&key_hash, 0).unwrap(), None);
    }
}
