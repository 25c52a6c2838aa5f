use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a uniformly random 6-digit numeric code, zero padded.
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

/// One-way hash of a code for storage. Only the hash is ever persisted.
pub fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6, "bad code: {code}");
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_is_stable_and_not_plaintext() {
        let hash = hash_code("012345");
        assert_eq!(hash, hash_code("012345"));
        assert_ne!(hash, hash_code("012346"));
        assert_eq!(hash.len(), 64);
        assert!(!hash.contains("012345"));
    }
}
