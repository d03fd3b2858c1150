//! Derivation of the Basic Access Control keys from the machine-readable zone.


use std::fmt;

use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypt::cipher_mac::{Cam3Des, CipherAndMac};
use crate::mrz::MrzIdentity;


/// The first 16 bytes of the SHA-1 hash of the MRZ key.
#[derive(Clone, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct KeySeed([u8; 16]);
impl KeySeed {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_mrz(identity: &MrzIdentity) -> Self {
        let mut mrz_key = identity.mrz_key();
        let hash = Sha1::digest(mrz_key.as_bytes());
        mrz_key.zeroize();

        let mut seed = [0u8; 16];
        seed.copy_from_slice(&hash[0..16]);
        Self(seed)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}
impl fmt::Debug for KeySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeySeed(..)")
    }
}


/// An encryption key and a MAC key, each two-key 3DES with odd parity.
///
/// Used both for the static keys protecting the handshake and for the session keys protecting
/// Secure Messaging.
#[derive(Clone, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    k_enc: [u8; 16],
    k_mac: [u8; 16],
}
impl KeyPair {
    pub const fn from_keys(k_enc: [u8; 16], k_mac: [u8; 16]) -> Self {
        Self { k_enc, k_mac }
    }

    /// Derives both keys from the given seed.
    pub fn derive(seed: &KeySeed) -> Self {
        let mut k_enc = [0u8; 16];
        let mut k_mac = [0u8; 16];
        k_enc.copy_from_slice(&Cam3Des.derive_encryption_key(seed.as_bytes()));
        k_mac.copy_from_slice(&Cam3Des.derive_mac_key(seed.as_bytes()));
        Self { k_enc, k_mac }
    }

    pub const fn k_enc(&self) -> &[u8; 16] { &self.k_enc }
    pub const fn k_mac(&self) -> &[u8; 16] { &self.k_mac }
}
impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair(..)")
    }
}

/// Keys derived from the MRZ; they only protect the handshake itself.
pub type StaticKeys = KeyPair;

/// Keys derived from the nonces exchanged during the handshake.
pub type SessionKeys = KeyPair;


/// Derives the static keys for the document.
pub fn derive_static_keys(identity: &MrzIdentity) -> StaticKeys {
    KeyPair::derive(&KeySeed::from_mrz(identity))
}
