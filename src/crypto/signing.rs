use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Invalid public key")]
    InvalidPublicKey,
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Generate an Ed25519 keypair
///
/// # Returns
/// (public_key, secret_key) - Both as 32-byte arrays
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);

    let secret_key = signing_key.to_bytes();
    let public_key = signing_key.verifying_key().to_bytes();

    (public_key, secret_key)
}

/// Domain-separated BLAKE3 digest: `BLAKE3(context || data)`.
fn digest(context: &[u8], data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Sign `BLAKE3(context || data)` with an Ed25519 secret key.
///
/// The context string keeps signatures made for one purpose (a chat message)
/// from being replayed as another (an owner proof).
pub fn sign_digest(context: &[u8], data: &[u8], secret_key: &[u8; 32]) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(secret_key);
    signing_key.sign(&digest(context, data)).to_bytes()
}

/// Verify a signature produced by [`sign_digest`].
///
/// Returns `Ok(false)` for a well-formed but wrong signature and
/// `Err(InvalidPublicKey)` when the key bytes are not a curve point.
pub fn verify_digest(
    context: &[u8],
    data: &[u8],
    signature: &[u8; 64],
    public_key: &[u8; 32],
) -> Result<bool> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| SigningError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(signature);

    match verifying_key.verify(&digest(context, data), &sig) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Derive the Ed25519 public key for a secret key.
pub fn derive_public_key(secret_key: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(secret_key).verifying_key().to_bytes()
}
