//! Rolling XOR transform used by Blood's RFF containers
//!
//! The key starts at a seed byte and increments every two bytes of
//! stream position, wrapping at 255. File data is seeded with zero and
//! only the first 0x100 bytes are scrambled; the v3.1 FAT is seeded
//! with the low byte of the FAT offset and scrambled in full.

use super::{Filter, FilterParams};
use crate::error::Result;

/// XOR `data` in place with the keystream starting at `seed`.
///
/// Symmetric: applying twice restores the input.
pub(crate) fn xor_blood_apply(data: &mut [u8], seed: u8) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= seed.wrapping_add((i / 2) as u8);
    }
}

pub struct XorBlood {
    default_limit: Option<usize>,
}

impl XorBlood {
    /// Codec configured the way RFF file data uses it: seed zero,
    /// first 0x100 bytes only.
    pub fn for_file_data() -> Self {
        XorBlood {
            default_limit: Some(0x100),
        }
    }

    fn apply(&self, input: &[u8], params: &FilterParams) -> Vec<u8> {
        let limit = params
            .limit
            .or(self.default_limit)
            .unwrap_or(usize::MAX)
            .min(input.len());
        let mut out = input.to_vec();
        xor_blood_apply(&mut out[..limit], params.seed);
        out
    }
}

impl Filter for XorBlood {
    fn decode(&self, stored: &[u8], params: &FilterParams) -> Result<Vec<u8>> {
        Ok(self.apply(stored, params))
    }

    fn encode(&self, real: &[u8], params: &FilterParams) -> Result<Vec<u8>> {
        Ok(self.apply(real, params))
    }
}
