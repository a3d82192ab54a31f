//! Fixtures shared by the chat and scenario tests.

use async_trait::async_trait;

use crate::crypto::{OwnerProof, PublicKeyHash, SigningIdentity};
use crate::messaging::chat::Chat;
use crate::messaging::message::SignedMessage;
use crate::messaging::resolver::KeyDirectory;
use crate::messaging::store::{MemoryMessageStore, MessageStore, StoreError};

/// One user: root identity (published to the directory), chat key, and log.
pub(crate) struct Participant {
    pub root: SigningIdentity,
    pub chat_key: SigningIdentity,
    pub store: MemoryMessageStore,
}

impl Participant {
    pub async fn new(directory: &KeyDirectory) -> Self {
        let root = SigningIdentity::generate();
        directory.publish(root.public_key()).await;
        Participant {
            root,
            chat_key: SigningIdentity::generate(),
            store: MemoryMessageStore::new(),
        }
    }

    pub fn hash(&self) -> PublicKeyHash {
        self.root.public_key_hash()
    }

    pub fn proof(&self) -> OwnerProof {
        OwnerProof::build(&self.root, self.chat_key.public_key_hash())
    }

    pub async fn join(&self, chat: &mut Chat) {
        chat.join(self.proof(), &self.chat_key, &self.store).await.unwrap();
    }

    pub async fn post(&self, chat: &mut Chat, text: &str) -> SignedMessage {
        chat.add_message(text.as_bytes(), &self.chat_key, &self.store)
            .await
            .unwrap()
    }
}

/// Single-founder chat, founder already joined.
pub(crate) async fn found(directory: &KeyDirectory, username: &str) -> (Chat, Participant) {
    let founder = Participant::new(directory).await;
    let mut chat = Chat::create_new(username, founder.hash());
    founder.join(&mut chat).await;
    (chat, founder)
}

/// Invite a new user, bootstrap their replica from the inviter's, and join.
pub(crate) async fn invite(
    inviter_chat: &mut Chat,
    inviter: &Participant,
    username: &str,
    directory: &KeyDirectory,
) -> (Chat, Participant) {
    let invitee = Participant::new(directory).await;
    let member = inviter_chat
        .invite_member(username, invitee.hash(), &inviter.chat_key, &inviter.store)
        .await
        .unwrap();
    let mut chat = inviter_chat.copy(&member).unwrap();
    invitee.store.mirror(&inviter.store).await;
    invitee.join(&mut chat).await;
    (chat, invitee)
}

/// Store whose appends always fail.
pub(crate) struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn len(&self) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn get_messages_from(&self, index: u64) -> Result<Vec<SignedMessage>, StoreError> {
        if index > 0 {
            return Err(StoreError::IndexOutOfRange { index, len: 0 });
        }
        Ok(Vec::new())
    }

    async fn get_messages(&self, from: u64, to: u64) -> Result<Vec<SignedMessage>, StoreError> {
        if from > 0 || to > 0 {
            return Err(StoreError::IndexOutOfRange { index: to.max(from), len: 0 });
        }
        Ok(Vec::new())
    }

    async fn add_message(&self, _message: &SignedMessage) -> Result<(), StoreError> {
        Err(StoreError::Io("disk full".into()))
    }
}
