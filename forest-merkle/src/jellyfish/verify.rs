use crate::{
    common::{
        sum,
        Bytes32,
        NibblePath,
    },
    jellyfish::{
        commitment::CommitmentScheme,
        proof::JmtProof,
    },
};

/// The proof is internally inconsistent with the queried key and cannot
/// attest to anything about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum MalformedProof {
    /// A step's compressed segment disagrees with the key's path.
    #[display(fmt = "skip segment diverges from the key path at step {}", _0)]
    SkipMismatch(usize),
    /// A step selects a different child slot than the key's path nibble.
    #[display(fmt = "child index off the key path at step {}", _0)]
    ChildIndexMismatch(usize),
    /// The steps consume more nibbles than the key path holds.
    #[display(fmt = "steps overrun the key path")]
    PathOverflow,
    /// A sibling neighbor sits on the traversed slot itself.
    #[display(fmt = "neighbor occupies the traversed slot at step {}", _0)]
    NeighborOnPath(usize),
    /// The claimed fork does not diverge from the key path.
    #[display(fmt = "fork lies on the key path")]
    ForkOnPath,
    /// The conflicting leaf does not share the traversed prefix.
    #[display(fmt = "conflicting leaf off the traversed prefix")]
    LeafPathMismatch,
    /// A non-inclusion proof names the queried key itself as the
    /// conflicting leaf.
    #[display(fmt = "conflicting leaf equals the queried key")]
    LeafIsQueriedKey,
}

#[cfg(feature = "std")]
impl std::error::Error for MalformedProof {}

/// Checks `proof` against `root` for the statement "`key` maps to `value`"
/// (inclusion, `Some`) or "`key` is absent" (non-inclusion, `None`).
///
/// Returns `Ok(false)` when the proof is well formed but attests to a
/// different statement or a different root.
pub fn verify<C: CommitmentScheme>(
    root: &Bytes32,
    proof: &JmtProof,
    key: &[u8],
    value: Option<&[u8]>,
) -> Result<bool, MalformedProof> {
    match (proof, value) {
        (JmtProof::Inclusion(inclusion), Some(value)) => {
            if inclusion.value_hash != sum(value) {
                return Ok(false);
            }
        }
        (JmtProof::NonInclusionEmpty(_), None)
        | (JmtProof::NonInclusionDifferentLeaf(_), None) => {}
        _ => return Ok(false),
    }
    let key_path = NibblePath::from_bytes(&sum(key));
    let computed = compute_root::<C>(proof, &key_path)?;
    Ok(computed.unwrap_or_else(C::null_hash) == *root)
}

/// Replays the proof bottom-up and returns the root it commits to. `None`
/// stands for the empty tree.
pub(crate) fn compute_root<C: CommitmentScheme>(
    proof: &JmtProof,
    key_path: &NibblePath,
) -> Result<Option<Bytes32>, MalformedProof> {
    let steps = proof.steps();
    let nibbles = key_path.nibbles();

    let mut cursor = 0usize;
    for (ix, step) in steps.iter().enumerate() {
        let next = cursor + step.skip.len() + 1;
        if next > nibbles.len() {
            return Err(MalformedProof::PathOverflow);
        }
        if step.skip.nibbles() != &nibbles[cursor..next - 1] {
            return Err(MalformedProof::SkipMismatch(ix));
        }
        let nibble = nibbles[next - 1];
        if step.child_index != nibble {
            return Err(MalformedProof::ChildIndexMismatch(ix));
        }
        if let Some(neighbor) = &step.neighbor {
            if neighbor.nibble() == nibble {
                return Err(MalformedProof::NeighborOnPath(ix));
            }
        }
        cursor = next;
    }

    let mut candidate = terminal_hash::<C>(proof, key_path, cursor)?;
    for step in steps.iter().rev() {
        let mut children = step.children;
        children[usize::from(step.child_index)] = candidate;
        candidate = Some(C::commit_branch(&step.skip, &children));
    }
    Ok(candidate)
}

/// Hash of the node (or absence) at the end of the traversal, with the steps
/// already consuming `anchor` nibbles of the key path.
fn terminal_hash<C: CommitmentScheme>(
    proof: &JmtProof,
    key_path: &NibblePath,
    anchor: usize,
) -> Result<Option<Bytes32>, MalformedProof> {
    let nibbles = key_path.nibbles();
    match proof {
        JmtProof::Inclusion(inclusion) => Ok(Some(C::commit_leaf(
            &key_path.suffix(anchor),
            &inclusion.value_hash,
        ))),
        JmtProof::NonInclusionEmpty(empty) => {
            let Some(fork) = &empty.fork else {
                return Ok(None);
            };
            let divergence = anchor + fork.skip.len();
            if divergence >= nibbles.len() {
                return Err(MalformedProof::PathOverflow);
            }
            if fork.skip.nibbles() != &nibbles[anchor..divergence] {
                return Err(MalformedProof::SkipMismatch(proof.steps().len()));
            }
            if fork.nibble == nibbles[divergence] {
                return Err(MalformedProof::ForkOnPath);
            }
            // Reassembled segment of the node the key path exits partway
            // through: shared head, its own nibble, then the remainder.
            let segment = fork.skip.child(fork.nibble).concat(&fork.prefix);
            Ok(Some(C::commit_branch(&segment, &fork.children)))
        }
        JmtProof::NonInclusionDifferentLeaf(leaf) => {
            let neighbor_path = NibblePath::from_bytes(&leaf.leaf_key_hash);
            if neighbor_path.nibbles().get(..anchor) != nibbles.get(..anchor) {
                return Err(MalformedProof::LeafPathMismatch);
            }
            if neighbor_path.nibbles() == nibbles {
                return Err(MalformedProof::LeafIsQueriedKey);
            }
            Ok(Some(C::commit_leaf(
                &neighbor_path.suffix(anchor),
                &leaf.leaf_value_hash,
            )))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jellyfish::{
        commitment::{
            Classic,
            Mpf,
        },
        proof::{
            BranchStep,
            ForkStep,
            InclusionProof,
            NonInclusionEmptyProof,
            NonInclusionLeafProof,
        },
    };

    fn key_path(key: &[u8]) -> NibblePath {
        NibblePath::from_bytes(&sum(key))
    }

    #[test]
    fn verify__empty_proof_against_null_root() {
        let proof = JmtProof::NonInclusionEmpty(NonInclusionEmptyProof {
            steps: vec![],
            fork: None,
        });
        assert_eq!(
            verify::<Classic>(&[0u8; 32], &proof, b"anything", None),
            Ok(true)
        );
        assert_eq!(
            verify::<Mpf>(&[0u8; 32], &proof, b"anything", None),
            Ok(true)
        );
        assert_eq!(
            verify::<Classic>(&[1u8; 32], &proof, b"anything", None),
            Ok(false)
        );
    }

    #[test]
    fn verify__single_leaf_inclusion() {
        let value = b"value".to_vec();
        let value_hash = sum(&value);
        let root = Classic::commit_leaf(&key_path(b"key"), &value_hash);
        let proof = JmtProof::Inclusion(InclusionProof {
            steps: vec![],
            value_hash,
        });
        assert_eq!(
            verify::<Classic>(&root, &proof, b"key", Some(value.as_slice())),
            Ok(true)
        );
        // Wrong value for the same key.
        assert_eq!(
            verify::<Classic>(&root, &proof, b"key", Some(&b"other"[..])),
            Ok(false)
        );
        // Inclusion proofs never attest to absence.
        assert_eq!(verify::<Classic>(&root, &proof, b"key", None), Ok(false));
    }

    #[test]
    fn verify__different_leaf_non_inclusion() {
        let occupant_value_hash = sum(b"occupant value");
        let occupant_hash = sum(b"occupant");
        let root = Classic::commit_leaf(
            &NibblePath::from_bytes(&occupant_hash),
            &occupant_value_hash,
        );
        let proof = JmtProof::NonInclusionDifferentLeaf(NonInclusionLeafProof {
            steps: vec![],
            leaf_key_hash: occupant_hash,
            leaf_value_hash: occupant_value_hash,
        });
        assert_eq!(verify::<Classic>(&root, &proof, b"absent", None), Ok(true));
    }

    #[test]
    fn verify__different_leaf_naming_the_queried_key_is_malformed() {
        let value_hash = sum(b"value");
        let key_hash = sum(b"key");
        let proof = JmtProof::NonInclusionDifferentLeaf(NonInclusionLeafProof {
            steps: vec![],
            leaf_key_hash: key_hash,
            leaf_value_hash: value_hash,
        });
        assert_eq!(
            verify::<Classic>(&[0u8; 32], &proof, b"key", None),
            Err(MalformedProof::LeafIsQueriedKey)
        );
    }

    #[test]
    fn compute_root__folds_steps_over_the_terminal_leaf() {
        let key = b"key";
        let path = key_path(key);
        let value_hash = sum(b"value");
        let leaf_hash = Classic::commit_leaf(&path.suffix(1), &value_hash);

        let sibling = sum(b"sibling subtree");
        let sibling_nibble = (path.get(0).unwrap() + 1) % 16;
        let mut children = [None; 16];
        children[usize::from(path.get(0).unwrap())] = Some(leaf_hash);
        children[usize::from(sibling_nibble)] = Some(sibling);
        let expected = Classic::commit_branch(&NibblePath::empty(), &children);

        let proof = JmtProof::Inclusion(InclusionProof {
            steps: vec![BranchStep {
                skip: NibblePath::empty(),
                children,
                child_index: path.get(0).unwrap(),
                neighbor: None,
            }],
            value_hash,
        });
        assert_eq!(
            compute_root::<Classic>(&proof, &path),
            Ok(Some(expected))
        );
    }

    #[test]
    fn compute_root__rejects_skip_off_the_key_path() {
        let path = key_path(b"key");
        let wrong_nibble = (path.get(0).unwrap() + 1) % 16;
        let proof = JmtProof::Inclusion(InclusionProof {
            steps: vec![BranchStep {
                skip: NibblePath::from_nibbles(&[wrong_nibble]).unwrap(),
                children: [None; 16],
                child_index: 0,
                neighbor: None,
            }],
            value_hash: sum(b"value"),
        });
        assert_eq!(
            compute_root::<Classic>(&proof, &path),
            Err(MalformedProof::SkipMismatch(0))
        );
    }

    #[test]
    fn compute_root__rejects_fork_on_the_key_path() {
        let path = key_path(b"key");
        let proof = JmtProof::NonInclusionEmpty(NonInclusionEmptyProof {
            steps: vec![],
            fork: Some(ForkStep {
                skip: NibblePath::empty(),
                nibble: path.get(0).unwrap(),
                prefix: NibblePath::empty(),
                children: [None; 16],
            }),
        });
        assert_eq!(
            compute_root::<Classic>(&proof, &path),
            Err(MalformedProof::ForkOnPath)
        );
    }

    #[test]
    fn compute_root__fork_reconstructs_the_diverging_node() {
        let path = key_path(b"key");
        let fork_nibble = (path.get(0).unwrap() + 1) % 16;
        let mut children = [None; 16];
        children[3] = Some(sum(b"left"));
        children[9] = Some(sum(b"right"));
        let prefix = NibblePath::from_nibbles(&[0x0a, 0x0b]).unwrap();

        let segment = NibblePath::from_nibbles(&[fork_nibble, 0x0a, 0x0b]).unwrap();
        let expected = Classic::commit_branch(&segment, &children);

        let proof = JmtProof::NonInclusionEmpty(NonInclusionEmptyProof {
            steps: vec![],
            fork: Some(ForkStep {
                skip: NibblePath::empty(),
                nibble: fork_nibble,
                prefix,
                children,
            }),
        });
        assert_eq!(compute_root::<Classic>(&proof, &path), Ok(Some(expected)));
    }

    #[test]
    fn verify__schemes_disagree_on_the_same_tree() {
        let value = b"value".to_vec();
        let value_hash = sum(&value);
        let classic_root = Classic::commit_leaf(&key_path(b"key"), &value_hash);
        let mpf_root = Mpf::commit_leaf(&key_path(b"key"), &value_hash);
        assert_ne!(classic_root, mpf_root);

        let proof = JmtProof::Inclusion(InclusionProof {
            steps: vec![],
            value_hash,
        });
        assert_eq!(
            verify::<Mpf>(&mpf_root, &proof, b"key", Some(value.as_slice())),
            Ok(true)
        );
        assert_eq!(
            verify::<Mpf>(&classic_root, &proof, b"key", Some(value.as_slice())),
            Ok(false)
        );
    }
}
