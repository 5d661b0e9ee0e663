use sha2::{Digest, Sha256};

/// Derives a salted composite key from actor id + source address.
///
/// Login-attempt lockouts are scoped to (actor, source address) so one
/// shared household IP cannot lock every traveller out, and raw addresses
/// never appear in counter-store keys.
#[derive(Clone)]
pub struct ActorKeyHasher {
    server_secret: String,
}

impl ActorKeyHasher {
    pub fn new(server_secret: String) -> Self {
        Self { server_secret }
    }

    /// Generate a composite key from an actor id and a source address.
    ///
    /// # Returns
    /// A hexadecimal string representing the hashed composite key
    pub fn generate(&self, actor_id: &str, source_addr: &str) -> String {
        let combined = format!("{}:{}:{}", actor_id, source_addr, self.server_secret);
        let mut hasher = Sha256::new();
        hasher.update(combined.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Validate that a composite key matches the expected format
    #[allow(dead_code)]
    pub fn is_valid_key(&self, key: &str) -> bool {
        // A SHA256 hash in hex is 64 characters
        key.len() == 64 && key.chars().all(|c| c.is_ascii_hexdigit())
    }
}
