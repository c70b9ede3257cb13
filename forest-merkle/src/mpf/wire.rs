use crate::{
    common::{
        Bytes32,
        NibblePath,
    },
    jellyfish::{
        merkle16,
        merkle_range,
        proof::{
            JmtProof,
            StepNeighbor,
        },
        MalformedProof,
    },
};

use alloc::vec::Vec;
use minicbor::data::Tag;

pub(crate) const TAG_BRANCH: u64 = 121;
pub(crate) const TAG_FORK: u64 = 122;
pub(crate) const TAG_LEAF: u64 = 123;

/// One decoded step of the CBOR proof wire.
///
/// `Branch` carries the four aggregated sibling digests of the binary
/// reduction; `Fork` and `Leaf` are the compact forms used when the traversed
/// branch holds exactly one sibling next to the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireStep {
    Branch {
        skip: usize,
        neighbors: [Bytes32; 4],
    },
    Fork {
        skip: usize,
        nibble: u8,
        prefix: Vec<u8>,
        root: Bytes32,
    },
    Leaf {
        skip: usize,
        key_hash: Bytes32,
        value_hash: Bytes32,
    },
}

#[derive(Debug, derive_more::Display)]
pub enum WireError {
    #[display(fmt = "malformed proof wire: {}", _0)]
    Codec(anyhow::Error),
    #[display(fmt = "{}", _0)]
    Malformed(MalformedProof),
}

impl From<MalformedProof> for WireError {
    fn from(err: MalformedProof) -> Self {
        Self::Malformed(err)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for WireError {}

impl<C> minicbor::Encode<C> for WireStep {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        match self {
            WireStep::Branch { skip, neighbors } => {
                let mut concat = [0u8; 128];
                for (chunk, neighbor) in
                    concat.chunks_exact_mut(32).zip(neighbors.iter())
                {
                    chunk.copy_from_slice(neighbor);
                }
                e.tag(Tag::new(TAG_BRANCH))?
                    .array(2)?
                    .u64(*skip as u64)?
                    .bytes(&concat)?;
            }
            WireStep::Fork {
                skip,
                nibble,
                prefix,
                root,
            } => {
                e.tag(Tag::new(TAG_FORK))?.array(2)?.u64(*skip as u64)?;
                e.tag(Tag::new(TAG_BRANCH))?
                    .array(3)?
                    .u8(*nibble)?
                    .bytes(prefix)?
                    .bytes(root)?;
            }
            WireStep::Leaf {
                skip,
                key_hash,
                value_hash,
            } => {
                e.tag(Tag::new(TAG_LEAF))?
                    .array(3)?
                    .u64(*skip as u64)?
                    .bytes(key_hash)?
                    .bytes(value_hash)?;
            }
        }
        Ok(())
    }
}

impl<'b, C> minicbor::Decode<'b, C> for WireStep {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        use minicbor::decode::Error;

        let tag = d.tag()?;
        match tag.as_u64() {
            TAG_BRANCH => {
                let len = definite_array(d)?;
                if !(2..=3).contains(&len) {
                    return Err(Error::message("branch step expects 2 or 3 fields"));
                }
                let skip = d.u64()? as usize;
                let concat = d.bytes()?;
                if concat.len() != 128 {
                    return Err(Error::message(
                        "branch neighbors must be four 32-byte digests",
                    ));
                }
                let mut neighbors = [[0u8; 32]; 4];
                for (neighbor, chunk) in
                    neighbors.iter_mut().zip(concat.chunks_exact(32))
                {
                    neighbor.copy_from_slice(chunk);
                }
                // Optional trailing branch value digest; not part of the
                // commitment replay.
                if len == 3 {
                    d.skip()?;
                }
                Ok(WireStep::Branch { skip, neighbors })
            }
            TAG_FORK => {
                let len = definite_array(d)?;
                if len != 2 {
                    return Err(Error::message("fork step expects 2 fields"));
                }
                let skip = d.u64()? as usize;
                let inner = d.tag()?;
                if inner.as_u64() != TAG_BRANCH {
                    return Err(Error::message("fork neighbor must be branch-tagged"));
                }
                let inner_len = definite_array(d)?;
                if inner_len != 3 {
                    return Err(Error::message("fork neighbor expects 3 fields"));
                }
                let nibble = d.u8()?;
                if nibble > 0x0f {
                    return Err(Error::message("fork nibble out of range"));
                }
                let prefix = d.bytes()?.to_vec();
                let root: Bytes32 = d
                    .bytes()?
                    .try_into()
                    .map_err(|_| Error::message("fork root must be a 32-byte digest"))?;
                Ok(WireStep::Fork {
                    skip,
                    nibble,
                    prefix,
                    root,
                })
            }
            TAG_LEAF => {
                let len = definite_array(d)?;
                if len != 3 {
                    return Err(Error::message("leaf step expects 3 fields"));
                }
                let skip = d.u64()? as usize;
                let key_hash: Bytes32 = d.bytes()?.try_into().map_err(|_| {
                    Error::message("leaf key hash must be a 32-byte digest")
                })?;
                let value_hash: Bytes32 = d.bytes()?.try_into().map_err(|_| {
                    Error::message("leaf value hash must be a 32-byte digest")
                })?;
                Ok(WireStep::Leaf {
                    skip,
                    key_hash,
                    value_hash,
                })
            }
            _ => Err(Error::message("unknown proof step tag")),
        }
    }
}

fn definite_array(d: &mut minicbor::Decoder<'_>) -> Result<u64, minicbor::decode::Error> {
    d.array()?
        .ok_or_else(|| minicbor::decode::Error::message("indefinite arrays are not accepted"))
}

/// Encodes `proof` for the key whose digest path is `key_path`.
pub fn encode(proof: &JmtProof, key_path: &NibblePath) -> Vec<u8> {
    let steps = lower(proof, key_path);
    minicbor::to_vec(&steps).expect("encoding into a Vec cannot fail")
}

pub fn decode(wire: &[u8]) -> Result<Vec<WireStep>, WireError> {
    minicbor::decode::<Vec<WireStep>>(wire)
        .map_err(|err| WireError::Codec(anyhow::anyhow!("{err}")))
}

/// Lowers the structured proof to wire steps. Branches with a single sibling
/// next to the path become compact `Fork`/`Leaf` steps; non-inclusion proofs
/// gain a terminal step describing what blocks the key.
pub(crate) fn lower(proof: &JmtProof, key_path: &NibblePath) -> Vec<WireStep> {
    let mut wire = Vec::with_capacity(proof.steps().len() + 1);
    let mut cursor = 0usize;
    for step in proof.steps() {
        let skip = step.skip.len();
        let lowered = match &step.neighbor {
            Some(StepNeighbor::Leaf {
                key_hash,
                value_hash,
                ..
            }) => WireStep::Leaf {
                skip,
                key_hash: *key_hash,
                value_hash: *value_hash,
            },
            Some(StepNeighbor::Internal {
                nibble,
                prefix,
                children,
            }) => WireStep::Fork {
                skip,
                nibble: *nibble,
                prefix: prefix.to_bytes(),
                root: merkle16(children),
            },
            None => WireStep::Branch {
                skip,
                neighbors: compute_neighbors(&step.children, step.child_index),
            },
        };
        wire.push(lowered);
        cursor += skip + 1;
    }
    match proof {
        JmtProof::Inclusion(_) => {}
        JmtProof::NonInclusionEmpty(empty) => {
            if let Some(fork) = &empty.fork {
                wire.push(WireStep::Fork {
                    skip: fork.skip.len(),
                    nibble: fork.nibble,
                    prefix: fork.prefix.to_bytes(),
                    root: merkle16(&fork.children),
                });
            }
        }
        JmtProof::NonInclusionDifferentLeaf(leaf) => {
            let neighbor_path = NibblePath::from_bytes(&leaf.leaf_key_hash);
            let shared = key_path.common_prefix_len(&neighbor_path);
            wire.push(WireStep::Leaf {
                skip: shared.saturating_sub(cursor),
                key_hash: leaf.leaf_key_hash,
                value_hash: leaf.leaf_value_hash,
            });
        }
    }
    wire
}

/// The four aggregated sibling digests around `child_index`, widest range
/// first: each level folds the half of the remaining span not containing the
/// traversed slot.
pub(crate) fn compute_neighbors(
    children: &[Option<Bytes32>; 16],
    child_index: u8,
) -> [Bytes32; 4] {
    let me = usize::from(child_index);
    let mut neighbors = [[0u8; 32]; 4];
    let mut pivot = 8usize;
    let mut span = 8usize;
    for neighbor in neighbors.iter_mut() {
        if me < pivot {
            *neighbor = merkle_range(children, pivot, pivot + span);
            pivot -= span >> 1;
        } else {
            *neighbor = merkle_range(children, pivot - span, pivot);
            pivot += span >> 1;
        }
        span >>= 1;
    }
    neighbors
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        common::sum,
        jellyfish::proof::{
            BranchStep,
            InclusionProof,
        },
    };

    #[test]
    fn encode__branch_step_bit_layout_is_pinned() {
        let neighbors = [[0x11; 32], [0x22; 32], [0x33; 32], [0x44; 32]];
        let steps = vec![WireStep::Branch { skip: 0, neighbors }];
        let bytes = minicbor::to_vec(&steps).unwrap();

        // array(1), tag(121), array(2), uint 0, bytes(128)
        let mut expected = vec![0x81, 0xd8, 0x79, 0x82, 0x00, 0x58, 0x80];
        for neighbor in &neighbors {
            expected.extend_from_slice(neighbor);
        }
        assert_eq!(bytes, expected);
    }

    #[test]
    fn encode__leaf_step_bit_layout_is_pinned() {
        let steps = vec![WireStep::Leaf {
            skip: 5,
            key_hash: [0xaa; 32],
            value_hash: [0xbb; 32],
        }];
        let bytes = minicbor::to_vec(&steps).unwrap();

        // array(1), tag(123), array(3), uint 5, bytes(32), bytes(32)
        let mut expected = vec![0x81, 0xd8, 0x7b, 0x83, 0x05, 0x58, 0x20];
        expected.extend_from_slice(&[0xaa; 32]);
        expected.extend_from_slice(&[0x58, 0x20]);
        expected.extend_from_slice(&[0xbb; 32]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn decode__round_trips_every_step_shape() {
        let steps = vec![
            WireStep::Branch {
                skip: 2,
                neighbors: [[1; 32], [2; 32], [3; 32], [4; 32]],
            },
            WireStep::Fork {
                skip: 0,
                nibble: 0x0c,
                prefix: vec![0x01, 0x0f],
                root: [9; 32],
            },
            WireStep::Leaf {
                skip: 7,
                key_hash: [5; 32],
                value_hash: [6; 32],
            },
        ];
        let bytes = minicbor::to_vec(&steps).unwrap();
        assert_eq!(decode(&bytes).unwrap(), steps);
    }

    #[test]
    fn decode__rejects_truncated_digests() {
        let steps = vec![WireStep::Leaf {
            skip: 0,
            key_hash: [5; 32],
            value_hash: [6; 32],
        }];
        let mut bytes = minicbor::to_vec(&steps).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(decode(&bytes), Err(WireError::Codec(_))));
    }

    #[test]
    fn compute_neighbors__ranges_never_contain_the_traversed_slot() {
        let mut children = [None; 16];
        for nibble in 0..16u8 {
            children[usize::from(nibble)] = Some(sum([nibble]));
        }
        // Zeroing the traversed slot must not change any neighbor digest.
        for me in 0..16u8 {
            let with = compute_neighbors(&children, me);
            let mut without = children;
            without[usize::from(me)] = None;
            assert_eq!(with, compute_neighbors(&without, me));
        }
    }

    #[test]
    fn lower__single_neighbor_branch_becomes_a_compact_leaf_step() {
        let key_path = NibblePath::from_bytes(&sum(b"key"));
        let me = key_path.nibbles()[0];
        let sibling_nibble = (me + 1) % 16;
        let mut children = [None; 16];
        children[usize::from(me)] = Some([1; 32]);
        children[usize::from(sibling_nibble)] = Some([2; 32]);

        let proof = JmtProof::Inclusion(InclusionProof {
            steps: vec![BranchStep {
                skip: NibblePath::empty(),
                children,
                child_index: me,
                neighbor: Some(StepNeighbor::Leaf {
                    nibble: sibling_nibble,
                    key_hash: [7; 32],
                    value_hash: [8; 32],
                }),
            }],
            value_hash: [9; 32],
        });
        let wire = lower(&proof, &key_path);
        assert_eq!(
            wire,
            vec![WireStep::Leaf {
                skip: 0,
                key_hash: [7; 32],
                value_hash: [8; 32],
            }]
        );
    }
}
