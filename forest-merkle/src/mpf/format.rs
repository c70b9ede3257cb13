use crate::mpf::wire::{
    decode,
    WireError,
    WireStep,
};

use alloc::{
    format,
    string::String,
    vec::Vec,
};

/// Renders a proof wire as a JSON array of steps, one object per step.
pub fn to_json(wire: &[u8]) -> Result<String, WireError> {
    let steps = decode(wire)?;
    let rendered: Vec<String> = steps
        .iter()
        .map(|step| match step {
            WireStep::Branch { skip, neighbors } => {
                let concat: Vec<u8> =
                    neighbors.iter().flat_map(|n| n.iter().copied()).collect();
                format!(
                    r#"{{"type":"branch","skip":{},"neighbors":"{}"}}"#,
                    skip,
                    hex::encode(concat)
                )
            }
            WireStep::Fork {
                skip,
                nibble,
                prefix,
                root,
            } => format!(
                r#"{{"type":"fork","skip":{},"neighbor":{{"nibble":{},"prefix":"{}","root":"{}"}}}}"#,
                skip,
                nibble,
                hex::encode(prefix),
                hex::encode(root)
            ),
            WireStep::Leaf {
                skip,
                key_hash,
                value_hash,
            } => format!(
                r#"{{"type":"leaf","skip":{},"neighbor":{{"key":"{}","value":"{}"}}}}"#,
                skip,
                hex::encode(key_hash),
                hex::encode(value_hash)
            ),
        })
        .collect();
    Ok(format!("[{}]", rendered.join(",")))
}

/// Renders a proof wire as an Aiken source literal, ready to paste into an
/// on-chain validator.
pub fn to_aiken(wire: &[u8]) -> Result<String, WireError> {
    let steps = decode(wire)?;
    let mut out = String::from("[\n");
    for step in &steps {
        match step {
            WireStep::Branch { skip, neighbors } => {
                let concat: Vec<u8> =
                    neighbors.iter().flat_map(|n| n.iter().copied()).collect();
                out.push_str(&format!(
                    "  Branch {{ skip: {}, neighbors: #\"{}\" }},\n",
                    skip,
                    hex::encode(concat)
                ));
            }
            WireStep::Fork {
                skip,
                nibble,
                prefix,
                root,
            } => {
                out.push_str(&format!(
                    "  Fork {{ skip: {}, neighbor: Neighbor {{ nibble: {}, prefix: #\"{}\", root: #\"{}\" }} }},\n",
                    skip,
                    nibble,
                    hex::encode(prefix),
                    hex::encode(root)
                ));
            }
            WireStep::Leaf {
                skip,
                key_hash,
                value_hash,
            } => {
                out.push_str(&format!(
                    "  Leaf {{ skip: {}, key: #\"{}\", value: #\"{}\" }},\n",
                    skip,
                    hex::encode(key_hash),
                    hex::encode(value_hash)
                ));
            }
        }
    }
    out.push(']');
    Ok(out)
}
