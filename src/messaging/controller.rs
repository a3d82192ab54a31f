/// Owner of one replica.
///
/// A `ChatController` bundles a [`Chat`], the replica's own log, and its
/// private chat key behind a single async mutex, so local posts, invites and
/// merges on one replica never interleave. Replicas never share a controller;
/// they only read each other's stores.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::crypto::{OwnerProof, PublicKeyHash, SigningIdentity};
use crate::messaging::chat::{Chat, ChatError, MergeReport};
use crate::messaging::config::{ChatConfig, ConfigError};
use crate::messaging::id::Id;
use crate::messaging::member::Member;
use crate::messaging::message::SignedMessage;
use crate::messaging::resolver::IdentityResolver;
use crate::messaging::store::{MessageStore, StoreError};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Message of {size} bytes exceeds configured max of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Store entry {index} is not part of the chat history being copied")]
    HistoryMismatch { index: u64 },
}

/// Secrets a replica keeps to itself.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateChatState {
    pub chat_identity: SigningIdentity,
}

pub struct ChatController<S: MessageStore> {
    chat_uuid: Uuid,
    state: Mutex<Chat>,
    store: Arc<S>,
    private: PrivateChatState,
    config: ChatConfig,
}

impl<S: MessageStore> ChatController<S> {
    /// Start a new chat with `root` as its single founder.
    pub async fn create(
        username: &str,
        root: &SigningIdentity,
        store: Arc<S>,
        config: ChatConfig,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let mut chat = Chat::create_new(username, root.public_key_hash());
        let private = PrivateChatState {
            chat_identity: SigningIdentity::generate(),
        };
        join_with(&mut chat, root, &private, store.as_ref()).await?;

        let chat_uuid = Uuid::new_v4();
        log::info!("Chat {} created by {}", chat_uuid, username);
        Ok(ChatController {
            chat_uuid,
            state: Mutex::new(chat),
            store,
            private,
            config,
        })
    }

    /// Bootstrap an invitee's replica from the inviter's: copy its state and
    /// log, then append the invitee's Join.
    ///
    /// The Join is validated before `store` is written. If a copy fails
    /// part way, calling again with the same store resumes after the entries
    /// it already holds.
    pub async fn clone_and_join<R: MessageStore>(
        inviter: &ChatController<R>,
        member: &Member,
        root: &SigningIdentity,
        store: Arc<S>,
        config: ChatConfig,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let mut chat = {
            let source = inviter.state.lock().await;
            source.copy(member)?
        };
        let private = PrivateChatState {
            chat_identity: SigningIdentity::generate(),
        };
        let proof = OwnerProof::build(root, private.chat_identity.public_key_hash());
        chat.check_join(&proof, &private.chat_identity)?;

        let history = inviter.store.get_messages(0, chat.messages().len() as u64).await?;
        let held = store.len().await?;
        if held > history.len() as u64 {
            return Err(ControllerError::HistoryMismatch { index: history.len() as u64 });
        }
        let existing = store.get_messages(0, held).await?;
        if let Some(index) = existing.iter().zip(&history).position(|(a, b)| a != b) {
            return Err(ControllerError::HistoryMismatch { index: index as u64 });
        }
        for entry in &history[existing.len()..] {
            store.add_message(entry).await?;
        }

        chat.join(proof, &private.chat_identity, store.as_ref()).await?;
        log::info!("Joined chat {} as {}", inviter.chat_uuid, member.id);
        Ok(ChatController {
            chat_uuid: inviter.chat_uuid,
            state: Mutex::new(chat),
            store,
            private,
            config,
        })
    }

    /// Rebuild a controller from [`ChatController::save_state`] output.
    pub fn restore(
        chat_uuid: Uuid,
        state: &[u8],
        private: PrivateChatState,
        store: Arc<S>,
        config: ChatConfig,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let chat = Chat::from_bytes(state)?;
        Ok(ChatController {
            chat_uuid,
            state: Mutex::new(chat),
            store,
            private,
            config,
        })
    }

    pub async fn send_message(&self, text: &[u8]) -> Result<SignedMessage, ControllerError> {
        if text.len() > self.config.max_payload_bytes {
            return Err(ControllerError::PayloadTooLarge {
                size: text.len(),
                max: self.config.max_payload_bytes,
            });
        }
        let mut chat = self.state.lock().await;
        Ok(chat
            .add_message(text, &self.private.chat_identity, self.store.as_ref())
            .await?)
    }

    pub async fn invite(
        &self,
        username: &str,
        identity: PublicKeyHash,
    ) -> Result<Member, ControllerError> {
        let mut chat = self.state.lock().await;
        Ok(chat
            .invite_member(username, identity, &self.private.chat_identity, self.store.as_ref())
            .await?)
    }

    /// Merge from `host`'s log, at most `max_messages_per_merge` entries.
    pub async fn merge_from<R, I>(
        &self,
        host: &Id,
        remote: &R,
        resolver: &I,
    ) -> Result<MergeReport, ControllerError>
    where
        R: MessageStore + ?Sized,
        I: IdentityResolver + ?Sized,
    {
        let mut chat = self.state.lock().await;
        Ok(chat
            .merge_bounded(
                host,
                remote,
                self.store.as_ref(),
                resolver,
                self.config.max_messages_per_merge,
            )
            .await?)
    }

    /// Copy of the current replica state.
    pub async fn snapshot(&self) -> Chat {
        self.state.lock().await.clone()
    }

    /// This replica's own member record.
    pub async fn host(&self) -> Result<Member, ControllerError> {
        Ok(self.state.lock().await.us_member()?.clone())
    }

    pub async fn save_state(&self) -> Result<Vec<u8>, ControllerError> {
        Ok(self.state.lock().await.to_bytes()?)
    }

    pub fn chat_uuid(&self) -> Uuid {
        self.chat_uuid
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn private_state(&self) -> &PrivateChatState {
        &self.private
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }
}

async fn join_with<S: MessageStore + ?Sized>(
    chat: &mut Chat,
    root: &SigningIdentity,
    private: &PrivateChatState,
    store: &S,
) -> Result<SignedMessage, ChatError> {
    let proof = OwnerProof::build(root, private.chat_identity.public_key_hash());
    chat.join(proof, &private.chat_identity, store).await
}
