/// Owner resolution for Join admission.
///
/// A Join carries an [`OwnerProof`] naming the member's root identity only by
/// hash. Checking it needs the full public key, which lives in
/// content-addressed storage outside this crate; [`IdentityResolver`] is that
/// seam. [`KeyDirectory`] is an in-memory implementation.
use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::crypto::{OwnerProof, ProofError, PublicKeyHash};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("No public key published for {0}")]
    UnknownKey(PublicKeyHash),

    #[error("Owner proof rejected: {0}")]
    InvalidProof(#[from] ProofError),
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Verify `proof` and return the owner it vouches for.
    async fn resolve_owner(&self, proof: &OwnerProof) -> Result<PublicKeyHash, ResolverError>;
}

/// Content-addressed public key map: `PublicKeyHash -> Ed25519 public key`.
#[derive(Default)]
pub struct KeyDirectory {
    keys: RwLock<HashMap<PublicKeyHash, [u8; 32]>>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a public key under its hash and return the hash.
    pub async fn publish(&self, public_key: [u8; 32]) -> PublicKeyHash {
        let hash = PublicKeyHash::from_public_key(&public_key);
        self.keys.write().await.insert(hash, public_key);
        hash
    }

    pub async fn lookup(&self, hash: &PublicKeyHash) -> Option<[u8; 32]> {
        self.keys.read().await.get(hash).copied()
    }
}

#[async_trait]
impl IdentityResolver for KeyDirectory {
    async fn resolve_owner(&self, proof: &OwnerProof) -> Result<PublicKeyHash, ResolverError> {
        let public_key = self
            .lookup(&proof.owned_key)
            .await
            .ok_or(ResolverError::UnknownKey(proof.owned_key))?;
        Ok(proof.verify(&public_key)?)
    }
}
