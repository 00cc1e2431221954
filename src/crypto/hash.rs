use sha3::{Digest, Sha3_256};

/// SHA3-256 digest of arbitrary bytes.
pub fn sha3_256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Fingerprint stored in place of a raw session token.
pub fn token_hash(token: &str) -> String {
    hex::encode(sha3_256(token.as_bytes()))
}
