//! Replicated group chat.
//!
//! Each member runs a [`Chat`] replica over its own append-only
//! [`MessageStore`]. Replicas converge by merging each other's logs; causality
//! is tracked by a [`TreeClock`] keyed by hierarchical member [`Id`]s.
//!
//! Leaf to root:
//! - `id` / `tree_clock`: identifiers and the causal clock
//! - `member` / `message`: per-participant records and signed log entries
//! - `store` / `resolver`: persistence and identity collaborators
//! - `chat`: local operations and the merge engine
//! - `controller`: one replica behind a single async lock
pub mod chat;
pub mod config;
pub mod controller;
pub mod id;
pub mod limits;
pub mod member;
pub mod message;
pub mod resolver;
pub mod store;
pub mod tree_clock;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod test_support;

pub use chat::{Chat, ChatError, MergeReport};
pub use config::{ChatConfig, ConfigError};
pub use controller::{ChatController, ControllerError, PrivateChatState};
pub use id::{Id, IdError};
pub use member::Member;
pub use message::{Message, MessageBody, MessageError, SignedMessage};
pub use resolver::{IdentityResolver, KeyDirectory, ResolverError};
#[cfg(feature = "file-store")]
pub use store::FileMessageStore;
pub use store::{MemoryMessageStore, MessageStore, StoreError};
pub use tree_clock::{ClockError, TreeClock};
