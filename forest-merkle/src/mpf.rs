//! MPF proof wire format: CBOR encoding, recomputation-based verification and
//! read-only exporters, bit-compatible with the external binary-hash
//! verifier.

mod format;
mod verify;
pub mod wire;

pub use format::{
    to_aiken,
    to_json,
};
pub use verify::verify_wire;
pub use wire::{
    WireError,
    WireStep,
};
