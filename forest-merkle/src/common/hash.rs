use super::Bytes32;

use digest::Digest;
use sha2::Sha256;

pub const fn zero_sum() -> &'static Bytes32 {
    const ZERO_SUM: Bytes32 = [0; 32];

    &ZERO_SUM
}

pub fn sum<T: AsRef<[u8]>>(data: T) -> Bytes32 {
    let mut hash = Sha256::new();
    hash.update(data.as_ref());
    hash.finalize().into()
}

pub fn sum_iter<I: IntoIterator<Item = T>, T: AsRef<[u8]>>(iterator: I) -> Bytes32 {
    let mut hash = Sha256::new();
    for data in iterator {
        hash.update(data.as_ref());
    }
    hash.finalize().into()
}
