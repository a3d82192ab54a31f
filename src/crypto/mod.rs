pub mod identity;
pub mod signing;

pub use identity::{OwnerProof, ProofError, PublicKeyHash, SigningIdentity};
pub use signing::{derive_public_key, generate_keypair, sign_digest, verify_digest, SigningError};
