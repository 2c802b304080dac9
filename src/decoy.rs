//! Decoy/fake-output mixing: builds the obscured ring for one input out of
//! the node's random-output candidates, grounded in `setupFakeInputs`.

use crate::crypto::PublicKey;
use crate::error::{ConstructionError, WalletResult};
use crate::node::RandomOutput;

/// One ring member's `(globalOutputIndex, oneTimeKey)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingMember {
    pub global_index: u64,
    pub key: PublicKey,
}

/// A fully-obscured input: the ring of candidate outputs (real plus
/// decoys, sorted by global index) and the position within that ring
/// where the real output landed.
#[derive(Debug, Clone)]
pub struct ObscuredInput {
    pub ring: Vec<RingMember>,
    pub real_output_index: usize,
}

/// Build the ring for one input.
///
/// `fake_outputs` must already be the node's response for this input's
/// amount; they are sorted by `global_index`, the real output is skipped
/// if the node happened to return it as a decoy, the first `mixin` of the
/// rest are kept, and the real output is inserted at its sorted position.
pub fn obscure_input(
    amount: u64,
    real_global_index: u64,
    real_key: PublicKey,
    mut fake_outputs: Vec<RandomOutput>,
    mixin: u64,
) -> WalletResult<ObscuredInput> {
    fake_outputs.sort_by_key(|o| o.global_index);

    let mut ring: Vec<RingMember> = Vec::with_capacity(mixin as usize + 1);
    for fake in fake_outputs {
        if fake.global_index == real_global_index {
            continue;
        }
        ring.push(RingMember {
            global_index: fake.global_index,
            key: fake.key,
        });
        if ring.len() as u64 >= mixin {
            break;
        }
    }

    if (ring.len() as u64) < mixin {
        return Err(ConstructionError::NotEnoughFakeOutputs {
            amount,
            needed: mixin as usize,
            available: ring.len(),
        }
        .into());
    }

    let insert_position = ring
        .iter()
        .position(|m| m.global_index >= real_global_index)
        .unwrap_or(ring.len());

    ring.insert(
        insert_position,
        RingMember {
            global_index: real_global_index,
            key: real_key,
        },
    );

    Ok(ObscuredInput {
        ring,
        real_output_index: insert_position,
    })
}
