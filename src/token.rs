//! Random tokens for minting vault keys.

use rand::RngCore;

/// Default number of random bytes in a [`token`].
pub const TOKEN_SIZE: usize = 8;

/// Returns [`TOKEN_SIZE`] random bytes, hex encoded.
pub fn token() -> String {
    token_with_size(TOKEN_SIZE)
}

/// Returns `size` random bytes, hex encoded (`2 * size` characters).
pub fn token_with_size(size: usize) -> String {
    let mut bytes = vec![0u8; size];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
