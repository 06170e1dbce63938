//! X25519 static identity keys.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::core::{PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};

/// A static X25519 keypair for long-term node identity.
///
/// The private key is zeroized on drop.
#[derive(Clone)]
pub struct StaticKeypair {
    private: [u8; PRIVATE_KEY_SIZE],
    public: [u8; PUBLIC_KEY_SIZE],
}

impl StaticKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_secret(&secret)
    }

    /// Rebuild a keypair from a stored private key; the public half is recomputed.
    pub fn from_private(private: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self::from_secret(&StaticSecret::from(private))
    }

    fn from_secret(secret: &StaticSecret) -> Self {
        Self {
            private: secret.to_bytes(),
            public: PublicKey::from(secret).to_bytes(),
        }
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Raw private key, for persisting a node identity.
    pub fn private_key(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        &self.private
    }
}

impl Drop for StaticKeypair {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

impl std::fmt::Debug for StaticKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeypair")
            .field("public", &hex_prefix(&self.public))
            .finish_non_exhaustive()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_differ() {
        let alice = StaticKeypair::generate();
        let bob = StaticKeypair::generate();
        assert_ne!(alice.public_key(), bob.public_key());
    }

    #[test]
    fn test_from_private_recomputes_public() {
        let kp = StaticKeypair::generate();
        let restored = StaticKeypair::from_private(*kp.private_key());
        assert_eq!(restored.public_key(), kp.public_key());
    }

    #[test]
    fn test_debug_hides_private() {
        let kp = StaticKeypair::from_private([7u8; PRIVATE_KEY_SIZE]);
        let shown = format!("{kp:?}");
        assert!(shown.contains("public"));
        assert!(!shown.contains("private"));
    }
}
