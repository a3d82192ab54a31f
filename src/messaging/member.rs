use serde::{Deserialize, Serialize};

use crate::crypto::{OwnerProof, PublicKeyHash};
use crate::messaging::id::Id;

/// One participant as seen by a replica.
///
/// Members are never removed. Each replica owns its own copies; `Clone`
/// produces an independent record, so two replicas never share one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: Id,
    pub username: String,
    /// Hash of the member's root identity key, taken from their Invite.
    pub identity: PublicKeyHash,
    /// Set once the member's Join has been admitted.
    pub chat_identity: Option<OwnerProof>,
    /// Chat signing key published in the Join; verifies all later messages.
    pub chat_public_key: Option<[u8; 32]>,
    /// How many entries of this member's own log have been merged locally.
    pub messages_merged_upto: u64,
    /// Invites issued so far; the next invitee gets `id.fork(members_invited)`.
    pub members_invited: u32,
}

impl Member {
    pub fn new(id: Id, username: impl Into<String>, identity: PublicKeyHash, messages_merged_upto: u64) -> Self {
        Member {
            id,
            username: username.into(),
            identity,
            chat_identity: None,
            chat_public_key: None,
            messages_merged_upto,
            members_invited: 0,
        }
    }

    /// Copy of this member with its chat identity recorded.
    pub fn with_chat_id(&self, proof: OwnerProof, chat_public_key: [u8; 32]) -> Self {
        Member {
            chat_identity: Some(proof),
            chat_public_key: Some(chat_public_key),
            ..self.clone()
        }
    }

    /// Independent copy for a new replica.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn has_joined(&self) -> bool {
        self.chat_identity.is_some()
    }
}
