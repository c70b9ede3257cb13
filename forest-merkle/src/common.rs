mod hash;
mod nibbles;

pub use nibbles::NibblePath;

pub type Bytes32 = [u8; 32];

pub use hash::{
    sum,
    sum_iter,
    zero_sum,
};
