//! Seeding of the keyed hash state that defines a proof-of-work attempt.

use blake2b_simd::{Hash as Blake2bHash, Params as Blake2bParams, State as Blake2bState};
use byteorder::{LittleEndian, WriteBytesExt};

use crate::params::Params;

/// Initialises a BLAKE2b state personalised to the given Equihash parameters.
///
/// The personalization is `"ZcashPoW" || le32(n) || le32(k)`; no key and no
/// salt are used. The digest length is the expanded hash length, one
/// collision block per tree level.
///
/// The returned state is the seed of a single proof-of-work attempt: append
/// the attempt's input and nonce bytes to it, then pass it to a solver or
/// the verifier. The solvers never mutate it; every row clones it.
pub fn initialise_state(p: Params) -> Blake2bState {
    let mut personalization: Vec<u8> = Vec::from("ZcashPoW");
    personalization.write_u32::<LittleEndian>(p.n).unwrap();
    personalization.write_u32::<LittleEndian>(p.k).unwrap();

    Blake2bParams::new()
        .hash_length(p.hash_length())
        .personal(&personalization)
        .to_state()
}

/// Hashes a single index under the seeded state.
pub(crate) fn generate_hash(base_state: &Blake2bState, i: u32) -> Blake2bHash {
    let mut state = base_state.clone();
    state.update(&i.to_le_bytes());
    state.finalize()
}
