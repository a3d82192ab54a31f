//! # Shield Chat
//!
//! **Serverless, eventually-consistent group chat over append-only logs.**
//!
//! Every member of a chat runs its own replica. Replicas never talk to a
//! coordinator: each one appends to its own message log and periodically
//! merges the logs of the other members. Causality is tracked by a
//! [`TreeClock`](messaging::TreeClock) whose shape grows with the member tree,
//! and membership grows without conflicts because every invited member gets a
//! hierarchical [`Id`](messaging::Id) forked from its inviter.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shield_chat::crypto::{OwnerProof, SigningIdentity};
//! use shield_chat::messaging::{Chat, MemoryMessageStore};
//!
//! # async fn demo() -> Result<(), shield_chat::messaging::ChatError> {
//! let identity = SigningIdentity::generate();
//! let chat_key = SigningIdentity::generate();
//! let store = MemoryMessageStore::new();
//!
//! let mut chat = Chat::create_new("alice", identity.public_key_hash());
//! let proof = OwnerProof::build(&identity, chat_key.public_key_hash());
//! chat.join(proof, &chat_key, &store).await?;
//! chat.add_message(b"hello", &chat_key, &store).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`crypto`] | Ed25519 signing, key hashes, owner proofs |
//! | [`messaging`] | Ids, tree clocks, members, messages, chat merge engine, stores |

// Crate-level lint configuration.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments,
    clippy::type_complexity
)]

// ── Public modules ──────────────────────────────────────────────────────────

/// Signing keys, public key hashes, and owner proofs.
pub mod crypto;

/// Replicated group chat: identifiers, clocks, messages, merge engine.
pub mod messaging;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use crypto::{OwnerProof, PublicKeyHash, SigningIdentity};

pub use messaging::{
    Chat, ChatConfig, ChatController, ChatError, Id, IdentityResolver, KeyDirectory,
    MemoryMessageStore, Member, Message, MessageBody, MessageStore, SignedMessage, TreeClock,
};

// ── Library metadata ────────────────────────────────────────────────────────

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
pub fn version() -> &'static str {
    VERSION
}

// ── Tests ───────────────────────────────────────────────────────────────────
