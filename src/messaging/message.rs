/// Chat log entries.
///
/// Every entry is immutable and causally timestamped. The unit that is stored
/// and replicated is a [`SignedMessage`]: the [`Message`] plus an Ed25519
/// signature made with the author's chat key.
///
/// - Message: CBOR-serialized via ciborium (struct fields in declaration order)
/// - Payload: CBOR encoding of the closed [`MessageBody`] union
/// - Signing: Ed25519 over BLAKE3(context || message bytes)
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use thiserror::Error;

use crate::crypto::signing::{self, SigningError};
use crate::crypto::{OwnerProof, PublicKeyHash, SigningIdentity};
use crate::messaging::id::Id;
use crate::messaging::limits::MAX_PAYLOAD_BYTES;
use crate::messaging::tree_clock::TreeClock;

/// Signing context for chat log entries.
const MESSAGE_CONTEXT: &[u8] = b"SC-CHAT-MESSAGE";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Payload exceeds max size ({size} > {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("CBOR encoding failed: {0}")]
    Encode(String),

    #[error("CBOR decoding failed: {0}")]
    Decode(String),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),
}

// ---------------------------------------------------------------------------
// MessageBody
// ---------------------------------------------------------------------------

/// Closed set of payload variants. The serde tag is the discriminant, so an
/// unknown variant name fails to decode.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// Announces that `id` now exists. Does not make it an active participant.
    Invite {
        id: Id,
        username: String,
        identity: PublicKeyHash,
    },
    /// First message of a new member: binds its chat key to its root identity.
    Join {
        username: String,
        identity: PublicKeyHash,
        chat_identity: OwnerProof,
        chat_public_key: [u8; 32],
    },
    /// Opaque application payload.
    Text {
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
    },
}

impl MessageBody {
    pub fn text(body: impl Into<Vec<u8>>) -> Self {
        MessageBody::Text { body: body.into() }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        cbor_encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        cbor_decode(bytes)
    }

    /// Variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Invite { .. } => "Invite",
            MessageBody::Join { .. } => "Join",
            MessageBody::Text { .. } => "Text",
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub author: Id,
    pub timestamp: TreeClock,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Encode `body` and stamp it with `timestamp`.
    pub fn new(author: Id, timestamp: TreeClock, body: &MessageBody) -> Result<Self, MessageError> {
        let payload = body.encode()?;
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(MessageError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }
        Ok(Message {
            author,
            timestamp,
            payload,
        })
    }

    pub fn decode_body(&self) -> Result<MessageBody, MessageError> {
        MessageBody::decode(&self.payload)
    }

    /// Canonical bytes; these are what the author signs.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        cbor_encode(self)
    }
}

// ---------------------------------------------------------------------------
// SignedMessage
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedMessage {
    pub message: Message,
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl SignedMessage {
    pub fn sign(message: Message, signer: &SigningIdentity) -> Result<Self, MessageError> {
        let bytes = message.to_bytes()?;
        let signature = signer.sign(MESSAGE_CONTEXT, &bytes);
        Ok(SignedMessage { message, signature })
    }

    /// Check the signature against the author's chat public key.
    ///
    /// Returns `Ok(false)` for a wrong signature, `Err` if the key is malformed.
    pub fn verify(&self, public_key: &[u8; 32]) -> Result<bool, MessageError> {
        let bytes = self.message.to_bytes()?;
        Ok(signing::verify_digest(
            MESSAGE_CONTEXT,
            &bytes,
            &self.signature,
            public_key,
        )?)
    }

    pub fn author(&self) -> &Id {
        &self.message.author
    }

    pub fn timestamp(&self) -> &TreeClock {
        &self.message.timestamp
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        cbor_encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        cbor_decode(bytes)
    }
}

// ---------------------------------------------------------------------------
// CBOR helpers
// ---------------------------------------------------------------------------

/// CBOR-encode a value to bytes.
pub fn cbor_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, MessageError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| MessageError::Encode(e.to_string()))?;
    Ok(buf)
}

/// CBOR-decode a value from bytes.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, MessageError> {
    ciborium::from_reader(bytes).map_err(|e| MessageError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
