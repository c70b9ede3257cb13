use alloc::vec::Vec;
use core::fmt::{
    self,
    Debug,
    Formatter,
};

/// An ordered sequence of 4-bit values addressing a position in the tree.
///
/// A 32 byte key digest expands to 64 nibbles. Prefixes of that expansion
/// identify internal nodes; the full expansion identifies a leaf. Ordering is
/// lexicographic, so a path always sorts before any of its extensions, which
/// the ordered node indices rely on.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NibblePath {
    nibbles: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[display(fmt = "value {} is not a valid nibble", _0)]
pub struct InvalidNibble(pub u8);

impl NibblePath {
    pub const fn empty() -> Self {
        Self {
            nibbles: Vec::new(),
        }
    }

    /// Expands each byte into its high and low nibble.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }
        Self { nibbles }
    }

    pub fn from_nibbles(nibbles: &[u8]) -> Result<Self, InvalidNibble> {
        if let Some(invalid) = nibbles.iter().find(|nibble| **nibble > 0x0f) {
            return Err(InvalidNibble(*invalid));
        }
        Ok(Self {
            nibbles: nibbles.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.nibbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nibbles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.nibbles.get(index).copied()
    }

    pub fn nibbles(&self) -> &[u8] {
        &self.nibbles
    }

    /// Sub-path covering `start..end`, clamped to the path length.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.nibbles.len());
        let start = start.min(end);
        Self {
            nibbles: self.nibbles[start..end].to_vec(),
        }
    }

    /// Sub-path covering `start..len()`.
    pub fn suffix(&self, start: usize) -> Self {
        self.slice(start, self.nibbles.len())
    }

    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.nibbles.starts_with(&prefix.nibbles)
    }

    pub fn common_prefix_len(&self, other: &Self) -> usize {
        self.nibbles
            .iter()
            .zip(other.nibbles.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// This path extended by one nibble. The nibble is masked to 4 bits.
    pub fn child(&self, nibble: u8) -> Self {
        let mut nibbles = self.nibbles.clone();
        nibbles.push(nibble & 0x0f);
        Self { nibbles }
    }

    pub fn concat(&self, other: &Self) -> Self {
        let mut nibbles = self.nibbles.clone();
        nibbles.extend_from_slice(&other.nibbles);
        Self { nibbles }
    }

    /// One byte per nibble, the form hashed into branch and leaf preimages.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.nibbles.clone()
    }
}

impl Debug for NibblePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "NibblePath(")?;
        for nibble in &self.nibbles {
            write!(f, "{:x}", nibble)?;
        }
        write!(f, ")")
    }
}
