//! Object key generation.

use rand::Rng;

const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";
const KEY_LENGTH: usize = 8;

/// Generates object keys in the remote's key format.
///
/// Keys are eight characters drawn from an alphabet without the easily
/// confused `0`, `1` and `O`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    /// Generates a new random key.
    #[must_use]
    pub fn new_key() -> String {
        let mut rng = rand::thread_rng();
        (0..KEY_LENGTH)
            .map(|_| char::from(KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())]))
            .collect()
    }

    /// Returns true if `key` has the shape of a generated key.
    #[must_use]
    pub fn is_valid(key: &str) -> bool {
        key.len() == KEY_LENGTH && key.bytes().all(|b| KEY_ALPHABET.contains(&b))
    }
}
