use crate::{
    common::{
        sum,
        sum_iter,
        Bytes32,
        NibblePath,
    },
    jellyfish::{
        branch_from_merkle,
        hash_pair,
        merkle16,
        CommitmentScheme,
        MalformedProof,
        Mpf,
    },
    mpf::wire::{
        decode,
        WireError,
        WireStep,
    },
};

/// Replays a decoded proof wire against `root`.
///
/// With `value` present the proof is checked as an inclusion proof for
/// `(key, value)`; with `value` absent it is checked as a non-inclusion proof
/// for `key`. Returns `Ok(false)` when the replayed commitment differs from
/// `root`, and an error when the wire itself is inconsistent.
pub fn verify_wire(
    root: &Bytes32,
    key: &[u8],
    value: Option<&[u8]>,
    wire: &[u8],
) -> Result<bool, WireError> {
    let steps = decode(wire)?;
    let path = NibblePath::from_bytes(&sum(key));
    let value_hash = value.map(sum);
    let computed = replay(&steps, &path, value_hash.as_ref(), 0, 0)?
        .unwrap_or_else(Mpf::null_hash);
    Ok(computed == *root)
}

/// Recomputes the subtree commitment rooted after `cursor` consumed nibbles,
/// starting from step `ix`. `None` means the subtree is vacant.
fn replay(
    steps: &[WireStep],
    path: &NibblePath,
    value_hash: Option<&Bytes32>,
    cursor: usize,
    ix: usize,
) -> Result<Option<Bytes32>, MalformedProof> {
    let Some(step) = steps.get(ix) else {
        return Ok(value_hash
            .map(|value_hash| Mpf::commit_leaf(&path.suffix(cursor), value_hash)));
    };
    let terminal = value_hash.is_none() && ix == steps.len() - 1;
    let skip = match step {
        WireStep::Branch { skip, .. }
        | WireStep::Fork { skip, .. }
        | WireStep::Leaf { skip, .. } => *skip,
    };
    let next_cursor = cursor
        .checked_add(skip)
        .and_then(|cursor| cursor.checked_add(1))
        .filter(|cursor| *cursor <= path.len())
        .ok_or(MalformedProof::PathOverflow)?;
    let nibble = path.nibbles()[next_cursor - 1];

    match step {
        WireStep::Branch { neighbors, .. } => {
            let child = replay(steps, path, value_hash, next_cursor, ix + 1)?
                .unwrap_or_else(Mpf::null_hash);
            let merkle = aggregate_siblings(nibble, &child, neighbors);
            Ok(Some(branch_from_merkle(
                &path.slice(cursor, next_cursor - 1),
                &merkle,
            )))
        }
        WireStep::Fork {
            nibble: fork_nibble,
            prefix,
            root,
            ..
        } => {
            if terminal {
                // The fork is the whole branch blocking the key: rebuild its
                // commitment from the neighbor description alone.
                let skip_bytes = path.slice(cursor, next_cursor - 1).to_bytes();
                return Ok(Some(sum_iter([
                    skip_bytes.as_slice(),
                    &[*fork_nibble][..],
                    prefix.as_slice(),
                    root.as_slice(),
                ])));
            }
            if *fork_nibble == nibble {
                return Err(MalformedProof::NeighborOnPath(ix));
            }
            let child = replay(steps, path, value_hash, next_cursor, ix + 1)?
                .unwrap_or_else(Mpf::null_hash);
            let neighbor = sum_iter([prefix.as_slice(), root.as_slice()]);
            let mut children = [None; 16];
            children[usize::from(nibble)] = Some(child);
            children[usize::from(*fork_nibble)] = Some(neighbor);
            Ok(Some(branch_from_merkle(
                &path.slice(cursor, next_cursor - 1),
                &merkle16(&children),
            )))
        }
        WireStep::Leaf {
            key_hash,
            value_hash: leaf_value_hash,
            ..
        } => {
            let neighbor_path = NibblePath::from_bytes(key_hash);
            if !neighbor_path.starts_with(&path.slice(0, cursor)) {
                return Err(MalformedProof::LeafPathMismatch);
            }
            let neighbor_nibble = neighbor_path.nibbles()[next_cursor - 1];
            if neighbor_nibble == nibble {
                return Err(MalformedProof::NeighborOnPath(ix));
            }
            if terminal {
                // The blocking node is a leaf on the queried prefix whose key
                // diverges exactly where the skip ends.
                return Ok(Some(Mpf::commit_leaf(
                    &neighbor_path.suffix(cursor),
                    leaf_value_hash,
                )));
            }
            let child = replay(steps, path, value_hash, next_cursor, ix + 1)?
                .unwrap_or_else(Mpf::null_hash);
            let neighbor =
                Mpf::commit_leaf(&neighbor_path.suffix(next_cursor), leaf_value_hash);
            let mut children = [None; 16];
            children[usize::from(nibble)] = Some(child);
            children[usize::from(neighbor_nibble)] = Some(neighbor);
            Ok(Some(branch_from_merkle(
                &path.slice(cursor, next_cursor - 1),
                &merkle16(&children),
            )))
        }
    }
}

/// Folds `child` at position `nibble` back up through the four aggregated
/// sibling digests, widest level first in `neighbors[0]`.
fn aggregate_siblings(nibble: u8, child: &Bytes32, neighbors: &[Bytes32; 4]) -> Bytes32 {
    let mut acc = *child;
    for level in (0..4).rev() {
        let bit = (nibble >> (3 - level)) & 1;
        acc = if bit == 0 {
            hash_pair(Some(&acc), Some(&neighbors[level]))
        } else {
            hash_pair(Some(&neighbors[level]), Some(&acc))
        };
    }
    acc
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        jellyfish::{
            in_memory::InMemoryStore,
            JellyfishMerkleTree,
            TreeConfig,
        },
        mpf::wire::compute_neighbors,
    };
    use rand::{
        rngs::StdRng,
        Rng,
        RngCore,
        SeedableRng,
    };

    fn tree() -> JellyfishMerkleTree<Mpf, InMemoryStore> {
        JellyfishMerkleTree::new(InMemoryStore::default(), TreeConfig::default())
    }

    #[test]
    fn verify_wire__empty_wire_matches_only_the_null_root() {
        let wire = minicbor::to_vec(Vec::<WireStep>::new()).unwrap();
        assert!(verify_wire(&Mpf::null_hash(), b"absent", None, &wire).unwrap());
        assert!(!verify_wire(&[7; 32], b"absent", None, &wire).unwrap());
    }

    #[test]
    fn aggregate_siblings__reconstructs_the_sixteen_ary_commitment() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut children = [None; 16];
        for child in children.iter_mut() {
            if rng.gen_bool(0.7) {
                let mut digest = [0u8; 32];
                rng.fill_bytes(&mut digest);
                *child = Some(digest);
            }
        }
        for nibble in 0..16u8 {
            let child = children[usize::from(nibble)].unwrap_or_else(Mpf::null_hash);
            let neighbors = compute_neighbors(&children, nibble);
            assert_eq!(
                aggregate_siblings(nibble, &child, &neighbors),
                merkle16(&children),
            );
        }
    }

    #[test]
    fn verify_wire__inclusion_proofs_replay_over_a_populated_tree() {
        let mut tree = tree();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0u8..24)
            .map(|i| (vec![i, 0xab], vec![i; 3]))
            .collect();
        tree.put(1, entries.iter().map(|(k, v)| (k.clone(), Some(v.clone()))))
            .unwrap();
        let root = tree.root_hash(1).unwrap();

        for (key, value) in &entries {
            let wire = tree.get_proof_wire(key, 1).unwrap();
            assert!(verify_wire(&root, key, Some(value.as_slice()), &wire).unwrap());
            assert!(!verify_wire(&root, key, Some(&b"other"[..]), &wire).unwrap());
            assert!(!verify_wire(&[0; 32], key, Some(value.as_slice()), &wire).unwrap());
            // The facade entry point is the same check.
            assert!(JellyfishMerkleTree::<Mpf, InMemoryStore>::verify_proof_wire(
                &root,
                key,
                Some(value.as_slice()),
                &wire,
            )
            .unwrap());
        }
    }

    #[test]
    fn verify_wire__non_inclusion_proofs_replay_for_absent_keys() {
        let mut tree = tree();
        tree.put(
            1,
            (0u8..24).map(|i| (vec![i, 0xab], Some(vec![i; 3]))),
        )
        .unwrap();
        let root = tree.root_hash(1).unwrap();

        for i in 0u8..24 {
            let absent = vec![i, 0xcd];
            let wire = tree.get_proof_wire(&absent, 1).unwrap();
            assert!(verify_wire(&root, &absent, None, &wire).unwrap());
            // The same wire cannot double as an inclusion proof.
            assert!(!verify_wire(&root, &absent, Some(&b"value"[..]), &wire).unwrap());
        }
    }

    #[test]
    fn verify_wire__proofs_survive_a_wire_round_trip() {
        let mut rng = StdRng::seed_from_u64(0xc0de);
        let mut tree = tree();
        let mut keys = Vec::new();
        for _ in 0..32 {
            let mut key = [0u8; 8];
            rng.fill_bytes(&mut key);
            keys.push(key.to_vec());
        }
        tree.put(1, keys.iter().map(|k| (k.clone(), Some(k.clone()))))
            .unwrap();
        let root = tree.root_hash(1).unwrap();

        for key in &keys {
            let wire = tree.get_proof_wire(key, 1).unwrap();
            let redecoded = minicbor::to_vec(decode(&wire).unwrap()).unwrap();
            assert_eq!(wire, redecoded);
            assert!(verify_wire(&root, key, Some(key.as_slice()), &wire).unwrap());
        }
    }

    #[test]
    fn verify_wire__oversized_skips_are_rejected_without_panicking() {
        // A skip large enough to overflow the cursor arithmetic.
        let steps = vec![WireStep::Branch {
            skip: usize::MAX,
            neighbors: [[0u8; 32]; 4],
        }];
        let wire = minicbor::to_vec(&steps).unwrap();
        assert!(matches!(
            verify_wire(&Mpf::null_hash(), b"key", None, &wire),
            Err(WireError::Malformed(MalformedProof::PathOverflow)),
        ));

        // A skip that merely runs past the end of the key path.
        let steps = vec![WireStep::Leaf {
            skip: 64,
            key_hash: [1u8; 32],
            value_hash: [2u8; 32],
        }];
        let wire = minicbor::to_vec(&steps).unwrap();
        assert!(matches!(
            verify_wire(&Mpf::null_hash(), b"key", None, &wire),
            Err(WireError::Malformed(MalformedProof::PathOverflow)),
        ));
    }

    #[test]
    fn verify_wire__terminal_leaf_on_the_queried_path_is_malformed() {
        // A non-inclusion wire whose blocking leaf names the queried key's
        // own hash does not diverge where the skip ends.
        let key = b"blocked";
        let steps = vec![WireStep::Leaf {
            skip: 0,
            key_hash: sum(key),
            value_hash: sum(b"value"),
        }];
        let wire = minicbor::to_vec(&steps).unwrap();
        assert!(matches!(
            verify_wire(&[0; 32], key, None, &wire),
            Err(WireError::Malformed(MalformedProof::NeighborOnPath(0))),
        ));
    }
}
