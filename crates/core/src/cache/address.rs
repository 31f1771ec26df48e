//! Content-addressed blob paths.
//!
//! A key maps to `<hex2>/<hex2>/<hex60>.v` under the cache root, so no single
//! directory collects more than 256 children at the first two levels.

use sha2::{Digest, Sha256};

/// Suffix appended to every blob file name.
pub const BLOB_SUFFIX: &str = ".v";

/// Compute the relative blob path for a cache key.
///
/// Depends on the key only, never on the payload, so rewriting a key
/// replaces its blob in place.
pub fn address_for(key: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(key));
    format!("{}/{}/{}{BLOB_SUFFIX}", &digest[..2], &digest[2..4], &digest[4..])
}
