//! Handshake transcript hashing, key schedule and confirmation MACs.

use std::sync::Arc;

use blake2::Blake2sMac256;
use blake2::digest::Mac;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::core::{CryptoError, HASH_SIZE, SESSION_KEY_SIZE, SessionId};
use crate::crypto::{CipherSuite, SessionKey};
use crate::message::MessageType;

const TRANSCRIPT_DOMAIN: &[u8] = b"homelink transcript v1";
const SESSION_KEY_INFO: &[u8] = b"homelink session keys";

/// MAC label for the initiator's key confirmation.
pub(crate) const INITIATOR_CONFIRM_LABEL: &[u8] = b"initiator";
/// MAC label for the responder's key confirmation.
pub(crate) const RESPONDER_CONFIRM_LABEL: &[u8] = b"responder";

/// Running SHA-256 over every handshake message exchanged so far.
#[derive(Clone, Debug)]
pub struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    pub fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(TRANSCRIPT_DOMAIN);
        Self { hasher }
    }

    /// Absorb one message (type byte plus TLV payload).
    pub fn absorb(&mut self, message_type: MessageType, payload: &[u8]) {
        self.hasher.update([message_type.as_byte()]);
        self.hasher.update((payload.len() as u32).to_le_bytes());
        self.hasher.update(payload);
    }

    /// Hash of everything absorbed.
    pub fn hash(&self) -> [u8; HASH_SIZE] {
        let digest = self.hasher.clone().finalize();
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest);
        out
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys produced once the Noise exchange completes.
pub(crate) struct DerivedKeys {
    pub(crate) initiator: SessionKey,
    pub(crate) responder: SessionKey,
    pub(crate) confirm: SessionKey,
}

/// Expand the Noise handshake hash, salted with the transcript, into the
/// two traffic keys and the confirmation key.
pub(crate) fn derive_keys(
    suite: &Arc<dyn CipherSuite>,
    session_id: SessionId,
    handshake_hash: &[u8; HASH_SIZE],
    transcript_hash: &[u8; HASH_SIZE],
) -> Result<DerivedKeys, CryptoError> {
    let mut info = SESSION_KEY_INFO.to_vec();
    info.extend_from_slice(&session_id.to_le_bytes());

    let mut okm = [0u8; 3 * SESSION_KEY_SIZE];
    suite.derive(handshake_hash, transcript_hash, &info, &mut okm)?;
    let keys = DerivedKeys {
        initiator: SessionKey::from_slice(&okm[..SESSION_KEY_SIZE])?,
        responder: SessionKey::from_slice(&okm[SESSION_KEY_SIZE..2 * SESSION_KEY_SIZE])?,
        confirm: SessionKey::from_slice(&okm[2 * SESSION_KEY_SIZE..])?,
    };
    okm.zeroize();
    Ok(keys)
}

/// BLAKE2s-MAC over `label || transcript_hash`.
pub(crate) fn confirmation_mac(
    key: &SessionKey,
    label: &[u8],
    transcript_hash: &[u8; HASH_SIZE],
) -> Result<[u8; HASH_SIZE], CryptoError> {
    let mut mac = keyed_mac(key)?;
    Mac::update(&mut mac, label);
    Mac::update(&mut mac, transcript_hash);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Constant-time check of a confirmation MAC.
pub(crate) fn verify_confirmation(
    key: &SessionKey,
    label: &[u8],
    transcript_hash: &[u8; HASH_SIZE],
    tag: &[u8],
) -> bool {
    let Ok(mut mac) = keyed_mac(key) else {
        return false;
    };
    Mac::update(&mut mac, label);
    Mac::update(&mut mac, transcript_hash);
    mac.verify_slice(tag).is_ok()
}

fn keyed_mac(key: &SessionKey) -> Result<Blake2sMac256, CryptoError> {
    <Blake2sMac256 as Mac>::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKey)
}
