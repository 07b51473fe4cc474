//! # Ed25519 Signer Keys
//!
//! Keys that authorize ledger transactions: the treasury (operator) key,
//! the per-asset admin and supply keys, and holders' own keys used for
//! token association.
//!
//! ## Security Invariant
//!
//! - Signing input MUST be `&CanonicalBytes`; raw bytes cannot be signed.
//! - `SignerKey` does not implement `Serialize`. The seed leaves the type
//!   only through [`SignerKey::seed_hex`], wrapped in `Zeroizing`.
//! - `Debug` never prints key material.

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use zeroize::Zeroizing;

use rwa_core::CanonicalBytes;

/// Key parsing and verification errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Malformed key or signature encoding.
    #[error("invalid key material: {0}")]
    Malformed(String),

    /// The signature does not verify.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
}

/// An Ed25519 public key, hex-encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

/// An Ed25519 signature, hex-encoded on the wire.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 64]);

/// A private signing key.
#[derive(Clone)]
pub struct SignerKey {
    signing_key: ed25519_dalek::SigningKey,
}

impl PublicKey {
    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        Ok(Self(decode_fixed::<32>(hex, "public key")?))
    }

    /// Verify `signature` over `data`.
    pub fn verify(&self, data: &CanonicalBytes, signature: &Signature) -> Result<(), KeyError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|e| KeyError::Malformed(format!("invalid public key: {e}")))?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        vk.verify(data.as_bytes(), &sig)
            .map_err(|e| KeyError::VerificationFailed(e.to_string()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", to_hex(&self.0[..4]))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Signature {
    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// Parse from a 128-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        Ok(Self(decode_fixed::<64>(hex, "signature")?))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", to_hex(&self.0[..4]))
    }
}

impl SignerKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut csprng = rand_core::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Restore a key from its 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Restore a key from a 64-character hex seed.
    pub fn from_seed_hex(hex: &str) -> Result<Self, KeyError> {
        let seed = Zeroizing::new(decode_fixed::<32>(hex, "signer seed")?);
        Ok(Self::from_seed(&seed))
    }

    /// The hex seed, for persistence and operator display only.
    pub fn seed_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(to_hex(self.signing_key.as_bytes()))
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign canonical bytes.
    pub fn sign(&self, data: &CanonicalBytes) -> Signature {
        Signature(self.signing_key.sign(data.as_bytes()).to_bytes())
    }
}

impl std::fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerKey")
            .field("public_key", &self.public_key())
            .field("seed", &"[REDACTED]")
            .finish()
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_fixed<const N: usize>(hex: &str, what: &str) -> Result<[u8; N], KeyError> {
    let hex = hex.trim();
    if hex.len() != N * 2 {
        return Err(KeyError::Malformed(format!(
            "{what} hex must be {} chars, got {}",
            N * 2,
            hex.len()
        )));
    }
    let mut out = [0u8; N];
    for (i, slot) in out.iter_mut().enumerate() {
        let pair = hex
            .get(i * 2..i * 2 + 2)
            .ok_or_else(|| KeyError::Malformed(format!("{what}: non-ASCII hex")))?;
        *slot = u8::from_str_radix(pair, 16)
            .map_err(|e| KeyError::Malformed(format!("{what}: invalid hex at {}: {e}", i * 2)))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_and_verify() {
        let key = SignerKey::generate();
        let data = CanonicalBytes::new(&json!({"tokenId": "0.0.5005", "amount": 10})).unwrap();
        let sig = key.sign(&data);
        key.public_key().verify(&data, &sig).unwrap();
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let data = CanonicalBytes::new(&json!({"a": 1})).unwrap();
        let sig = SignerKey::generate().sign(&data);
        assert!(SignerKey::generate().public_key().verify(&data, &sig).is_err());
    }

    #[test]
    fn test_seed_hex_roundtrip() {
        let key = SignerKey::generate();
        let restored = SignerKey::from_seed_hex(&key.seed_hex()).unwrap();
        assert_eq!(restored.public_key(), key.public_key());
    }

    #[test]
    fn test_from_seed_hex_rejects_bad_input() {
        assert!(SignerKey::from_seed_hex("abcd").is_err());
        assert!(SignerKey::from_seed_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_debug_redacts_seed() {
        let key = SignerKey::from_seed(&[7u8; 32]);
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&*key.seed_hex()));
    }

    #[test]
    fn test_public_key_serde_hex() {
        let pk = SignerKey::from_seed(&[1u8; 32]).public_key();
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json.len(), 66);
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
    }
}
