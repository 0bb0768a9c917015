use sha2::{Digest, Sha256};

pub fn to_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// 128-bit effective width, used for values fingerprints and release names.
pub fn to_sha256_truncate_32(input: &str) -> String {
    let mut hash_str = to_sha256(input);
    hash_str.truncate(32);
    hash_str
}
