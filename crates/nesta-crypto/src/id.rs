/// A random 128-bit identifier, hex encoded.
pub fn new_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// A random 256-bit opaque secret, hex encoded. Used for refresh tokens.
pub fn new_secret() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}
