//! Per-file byte transform filters
//!
//! Some formats store file data through a thin transform: Blood
//! encrypts with a rolling XOR, Monster Bash and EPF compress with LZW
//! variants. The archive engine stays oblivious to the byte-level
//! details; an entry just names its filter and the engine looks the
//! codec up here when reading or writing the file.

mod lzw;
mod xor;

pub use lzw::Lzw;
pub use xor::XorBlood;
pub(crate) use xor::xor_blood_apply;

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Per-open parameters a strategy can pass alongside the filter name.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterParams {
    /// Initial key for keyed transforms (`xor-blood`).
    pub seed: u8,
    /// Limit the transform to the first `n` bytes, untouched tail
    /// copied through. `None` uses the codec default.
    pub limit: Option<usize>,
}

/// An invertible byte transform.
///
/// `decode` maps stored bytes to real bytes (what the game sees after
/// decryption/decompression); `encode` is the inverse. Output length
/// may differ from input length; the engine resizes the stored region
/// to whatever `encode` produces.
pub trait Filter {
    fn decode(&self, stored: &[u8], params: &FilterParams) -> Result<Vec<u8>>;
    fn encode(&self, real: &[u8], params: &FilterParams) -> Result<Vec<u8>>;
}

/// Name-keyed codec lookup.
pub struct FilterRegistry {
    filters: HashMap<&'static str, Box<dyn Filter>>,
}

impl FilterRegistry {
    /// Registry pre-loaded with every built-in codec.
    pub fn builtin() -> Self {
        let mut filters: HashMap<&'static str, Box<dyn Filter>> = HashMap::new();
        filters.insert("xor-blood", Box::new(XorBlood::for_file_data()));
        filters.insert("lzw-bash", Box::new(Lzw::bash()));
        filters.insert("lzw-epfs", Box::new(Lzw::epfs()));
        FilterRegistry { filters }
    }

    pub fn register(&mut self, name: &'static str, filter: Box<dyn Filter>) {
        self.filters.insert(name, filter);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Filter> {
        self.filters
            .get(name)
            .map(|f| f.as_ref())
            .ok_or_else(|| Error::NotSupported(format!("no filter named {:?}", name)))
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let reg = FilterRegistry::builtin();
        assert!(reg.get("xor-blood").is_ok());
        assert!(reg.get("lzw-bash").is_ok());
        assert!(reg.get("lzw-epfs").is_ok());
        assert!(reg.get("zip-deflate").is_err());
    }
}
