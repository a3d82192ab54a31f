/// Identity types shared by every replica of a chat.
///
/// - `PublicKeyHash`: content address of an Ed25519 public key
/// - `SigningIdentity`: an Ed25519 keypair (root identity or chat identity)
/// - `OwnerProof`: a signed statement binding a chat key to a root identity

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::signing::{self, SigningError};

/// Signing context for owner proofs.
const OWNER_PROOF_CONTEXT: &[u8] = b"SC-OWNER-PROOF";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("Public key does not hash to the proof's owned key")]
    KeyMismatch,

    #[error("Owner proof signature is invalid")]
    InvalidSignature,

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),
}

// ---------------------------------------------------------------------------
// PublicKeyHash
// ---------------------------------------------------------------------------

/// Content address of a public key: BLAKE3(Ed25519 public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyHash(pub [u8; 32]);

impl PublicKeyHash {
    /// Hash an Ed25519 public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        PublicKeyHash(*blake3::hash(public_key).as_bytes())
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether `public_key` hashes to this value, compared in constant time.
    pub fn matches(&self, public_key: &[u8; 32]) -> bool {
        let other = Self::from_public_key(public_key);
        self.0.ct_eq(&other.0).into()
    }

    /// Hex-encode for display/storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyHash({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for PublicKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// SigningIdentity
// ---------------------------------------------------------------------------

/// An Ed25519 keypair. The secret half is wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SigningIdentity {
    public_key: [u8; 32],
    secret_key: [u8; 32],
}

impl SigningIdentity {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let (public_key, secret_key) = signing::generate_keypair();
        SigningIdentity { public_key, secret_key }
    }

    /// Rebuild a keypair from its 32-byte secret.
    pub fn from_secret(secret_key: [u8; 32]) -> Self {
        let public_key = signing::derive_public_key(&secret_key);
        SigningIdentity { public_key, secret_key }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    pub fn public_key_hash(&self) -> PublicKeyHash {
        PublicKeyHash::from_public_key(&self.public_key)
    }

    /// Sign `data` under a purpose-specific context string.
    pub fn sign(&self, context: &[u8], data: &[u8]) -> [u8; 64] {
        signing::sign_digest(context, data, &self.secret_key)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningIdentity({:?})", self.public_key_hash())
    }
}

// ---------------------------------------------------------------------------
// OwnerProof
// ---------------------------------------------------------------------------

/// Attestation that the holder of `owned_key` vouches for `owner`.
///
/// A member builds one with their root identity (`owned_key`) over the hash of
/// their chat-specific signing key (`owner`) and publishes it in their Join.
/// Anyone who can fetch the root public key by its hash can check it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProof {
    pub owned_key: PublicKeyHash,
    pub owner: PublicKeyHash,
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl OwnerProof {
    /// Sign `owner` with the root identity `owned`.
    pub fn build(owned: &SigningIdentity, owner: PublicKeyHash) -> Self {
        OwnerProof {
            owned_key: owned.public_key_hash(),
            owner,
            signature: owned.sign(OWNER_PROOF_CONTEXT, owner.as_bytes()),
        }
    }

    /// Check the proof against the owned key's full public key and return the
    /// proven owner.
    pub fn verify(&self, owned_public_key: &[u8; 32]) -> Result<PublicKeyHash, ProofError> {
        if !self.owned_key.matches(owned_public_key) {
            return Err(ProofError::KeyMismatch);
        }
        let valid = signing::verify_digest(
            OWNER_PROOF_CONTEXT,
            self.owner.as_bytes(),
            &self.signature,
            owned_public_key,
        )?;
        if !valid {
            return Err(ProofError::InvalidSignature);
        }
        Ok(self.owner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
