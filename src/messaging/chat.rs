/// Replicated chat state and the merge engine.
///
/// `Chat` is one member's replica: the member table, the local tree clock,
/// and the admitted log. Local operations (`invite_member`, `join`,
/// `add_message`) build, sign and append an entry before touching any
/// in-memory state. `merge` folds in a peer's log one entry at a time:
///
/// 1. Skip entries whose timestamp the local clock already dominates.
/// 2. Stage members that appear in the timestamp but not the local clock,
///    recovering each one from its Invite.
/// 3. If the author has not joined yet, the entry must be a valid Join.
/// 4. Check the author's signature.
/// 5. Append to the local store, then commit to memory and the clock.
///
/// The host's replication cursor advances once per examined entry. A failing
/// entry stops the batch with nothing of that entry applied, so a retry from
/// the same cursor is always safe.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{OwnerProof, PublicKeyHash, SigningIdentity};
use crate::messaging::id::{Id, IdError};
use crate::messaging::limits::MAX_INVITES_PER_MEMBER;
use crate::messaging::member::Member;
use crate::messaging::message::{cbor_decode, cbor_encode, Message, MessageBody, MessageError, SignedMessage};
use crate::messaging::resolver::{IdentityResolver, ResolverError};
use crate::messaging::store::{MessageStore, StoreError};
use crate::messaging::tree_clock::TreeClock;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("{0} is not a member of this chat")]
    NotInvited(Id),

    #[error("Identity mismatch for {member}: {reason}")]
    IdentityMismatch { member: Id, reason: String },

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Unknown member {0}")]
    UnknownMember(Id),

    #[error("No Invite found for {0}")]
    MissingInvite(Id),

    #[error("Invalid signature on message from {0}")]
    InvalidSignature(Id),

    #[error("Founder lists differ or are empty ({usernames} usernames, {identities} identities)")]
    FounderMismatch { usernames: usize, identities: usize },

    #[error("{0} has not joined the chat")]
    NotJoined(Id),

    #[error("{0} has already joined the chat")]
    AlreadyJoined(Id),

    #[error("{0} has used all of its invites")]
    InviteLimit(Id),

    #[error("Id error: {0}")]
    Id(#[from] IdError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

fn mismatch(member: &Id, reason: impl Into<String>) -> ChatError {
    ChatError::IdentityMismatch {
        member: member.clone(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// MergeReport
// ---------------------------------------------------------------------------

/// Outcome of one merge call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Remote entries examined; the host cursor advanced by this much.
    pub examined: usize,
    /// Entries appended to the local log.
    pub admitted: usize,
    /// Members discovered, in admission order.
    pub new_members: Vec<Id>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chat {
    us: Id,
    current: TreeClock,
    members: BTreeMap<Id, Member>,
    messages: Vec<SignedMessage>,
}

/// Persisted form of a replica.
#[derive(Serialize, Deserialize)]
struct ChatState {
    us: Id,
    current: TreeClock,
    members: Vec<Member>,
    messages: Vec<SignedMessage>,
}

impl Chat {
    /// New chat with a single founder.
    pub fn create_new(username: impl Into<String>, identity: PublicKeyHash) -> Chat {
        let creator = Id::creator();
        let us = Member::new(creator.clone(), username, identity, 0);
        log::info!("Created chat as {} ({})", us.username, creator);
        Chat {
            current: TreeClock::init([&creator]),
            members: BTreeMap::from([(creator.clone(), us)]),
            us: creator,
            messages: Vec::new(),
        }
    }

    /// Synchronized genesis: every founder exists in the initial clock, so no
    /// Invites are needed. Returns one replica per founder, in input order.
    pub fn create_new_group<S: AsRef<str>>(
        usernames: &[S],
        identities: &[PublicKeyHash],
    ) -> Result<Vec<Chat>, ChatError> {
        if usernames.len() != identities.len() || usernames.is_empty() {
            return Err(ChatError::FounderMismatch {
                usernames: usernames.len(),
                identities: identities.len(),
            });
        }

        let mut members = BTreeMap::new();
        for (i, (username, identity)) in usernames.iter().zip(identities).enumerate() {
            let id = Id::founder(i as u32);
            members.insert(id.clone(), Member::new(id, username.as_ref(), *identity, 0));
        }
        let genesis = TreeClock::init(members.keys());
        log::info!("Created chat with {} founders", members.len());

        Ok(members
            .keys()
            .map(|id| Chat {
                us: id.clone(),
                current: genesis.clone(),
                members: members.clone(),
                messages: Vec::new(),
            })
            .collect())
    }

    /// Independent replica for `as_member`, seeded from this one.
    pub fn copy(&self, as_member: &Member) -> Result<Chat, ChatError> {
        if !self.members.contains_key(&as_member.id) {
            return Err(ChatError::NotInvited(as_member.id.clone()));
        }
        let mut members: BTreeMap<Id, Member> =
            self.members.iter().map(|(id, m)| (id.clone(), m.copy())).collect();
        members.insert(as_member.id.clone(), as_member.copy());
        Ok(Chat {
            us: as_member.id.clone(),
            current: self.current.clone(),
            members,
            messages: self.messages.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Local operations
    // -----------------------------------------------------------------------

    /// Allocate an Id for a new member and append its Invite.
    ///
    /// The returned Member is what the invitee passes to [`Chat::copy`].
    pub async fn invite_member<S: MessageStore + ?Sized>(
        &mut self,
        username: impl Into<String>,
        identity: PublicKeyHash,
        signer: &SigningIdentity,
        store: &S,
    ) -> Result<Member, ChatError> {
        let inviter = self.signing_member(signer)?;
        if inviter.members_invited >= MAX_INVITES_PER_MEMBER {
            return Err(ChatError::InviteLimit(inviter.id.clone()));
        }
        let username = username.into();
        let new_id = inviter.id.fork(inviter.members_invited);
        let member = Member::new(new_id.clone(), username.clone(), identity, inviter.messages_merged_upto);

        let timestamp = self.current.with_member(&new_id).increment(&self.us);
        let body = MessageBody::Invite {
            id: new_id.clone(),
            username,
            identity,
        };
        let signed = self.append_local(body, timestamp, signer, store).await?;

        if let Some(us) = self.members.get_mut(&self.us) {
            us.members_invited += 1;
        }
        self.members.insert(new_id.clone(), member.clone());
        self.commit_local(signed);
        log::info!("{} invited {} as {}", self.us, member.username, new_id);
        Ok(member)
    }

    /// Announce this replica's member: bind `chat_signer` to the root identity
    /// recorded in its Invite.
    pub async fn join<S: MessageStore + ?Sized>(
        &mut self,
        chat_identity: OwnerProof,
        chat_signer: &SigningIdentity,
        store: &S,
    ) -> Result<SignedMessage, ChatError> {
        self.check_join(&chat_identity, chat_signer)?;
        let us = self.us_member()?.clone();

        let chat_public_key = chat_signer.public_key();
        let body = MessageBody::Join {
            username: us.username.clone(),
            identity: us.identity,
            chat_identity: chat_identity.clone(),
            chat_public_key,
        };
        let timestamp = self.current.increment(&self.us);
        let signed = self.append_local(body, timestamp, chat_signer, store).await?;

        self.members
            .insert(us.id.clone(), us.with_chat_id(chat_identity, chat_public_key));
        self.commit_local(signed.clone());
        log::info!("{} joined as {}", us.username, us.id);
        Ok(signed)
    }

    /// Checks [`Chat::join`] makes before writing anything.
    pub fn check_join(
        &self,
        chat_identity: &OwnerProof,
        chat_signer: &SigningIdentity,
    ) -> Result<(), ChatError> {
        let us = self.us_member()?;
        if us.has_joined() {
            return Err(ChatError::AlreadyJoined(us.id.clone()));
        }
        if chat_identity.owned_key != us.identity {
            return Err(mismatch(&us.id, "proof is not signed by the invited identity"));
        }
        if chat_identity.owner != chat_signer.public_key_hash() {
            return Err(mismatch(&us.id, "proof does not name the chat key"));
        }
        Ok(())
    }

    /// Post an opaque text payload.
    pub async fn add_message<S: MessageStore + ?Sized>(
        &mut self,
        text: &[u8],
        signer: &SigningIdentity,
        store: &S,
    ) -> Result<SignedMessage, ChatError> {
        self.signing_member(signer)?;
        let timestamp = self.current.increment(&self.us);
        let signed = self
            .append_local(MessageBody::text(text), timestamp, signer, store)
            .await?;
        self.commit_local(signed.clone());
        log::debug!("{} posted {} bytes", self.us, text.len());
        Ok(signed)
    }

    /// `us`, provided it has joined with `signer`'s key.
    fn signing_member(&self, signer: &SigningIdentity) -> Result<&Member, ChatError> {
        let us = self.us_member()?;
        match us.chat_public_key {
            None => Err(ChatError::NotJoined(us.id.clone())),
            Some(key) if key != signer.public_key() => {
                Err(mismatch(&us.id, "signer is not the joined chat key"))
            }
            Some(_) => Ok(us),
        }
    }

    async fn append_local<S: MessageStore + ?Sized>(
        &self,
        body: MessageBody,
        timestamp: TreeClock,
        signer: &SigningIdentity,
        store: &S,
    ) -> Result<SignedMessage, ChatError> {
        let message = Message::new(self.us.clone(), timestamp, &body)?;
        let signed = SignedMessage::sign(message, signer)?;
        store.add_message(&signed).await?;
        Ok(signed)
    }

    fn commit_local(&mut self, signed: SignedMessage) {
        self.current = signed.message.timestamp.clone();
        self.messages.push(signed);
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Fold in every entry of `remote_host`'s log past the local cursor.
    pub async fn merge<R, L, I>(
        &mut self,
        remote_host: &Id,
        remote: &R,
        local: &L,
        resolver: &I,
    ) -> Result<MergeReport, ChatError>
    where
        R: MessageStore + ?Sized,
        L: MessageStore + ?Sized,
        I: IdentityResolver + ?Sized,
    {
        let cursor = self.cursor_of(remote_host)?;
        let batch = remote.get_messages_from(cursor).await?;
        self.merge_batch(remote_host, batch, local, resolver).await
    }

    /// Like [`Chat::merge`], examining at most `max_messages` entries.
    pub async fn merge_bounded<R, L, I>(
        &mut self,
        remote_host: &Id,
        remote: &R,
        local: &L,
        resolver: &I,
        max_messages: usize,
    ) -> Result<MergeReport, ChatError>
    where
        R: MessageStore + ?Sized,
        L: MessageStore + ?Sized,
        I: IdentityResolver + ?Sized,
    {
        let cursor = self.cursor_of(remote_host)?;
        let len = remote.len().await?;
        let end = cursor.saturating_add(max_messages as u64).min(len);
        let batch = remote.get_messages(cursor, end.max(cursor)).await?;
        self.merge_batch(remote_host, batch, local, resolver).await
    }

    fn cursor_of(&self, host: &Id) -> Result<u64, ChatError> {
        self.members
            .get(host)
            .map(|m| m.messages_merged_upto)
            .ok_or_else(|| ChatError::UnknownMember(host.clone()))
    }

    async fn merge_batch<L, I>(
        &mut self,
        remote_host: &Id,
        batch: Vec<SignedMessage>,
        local: &L,
        resolver: &I,
    ) -> Result<MergeReport, ChatError>
    where
        L: MessageStore + ?Sized,
        I: IdentityResolver + ?Sized,
    {
        log::info!("{} merging {} entries from {}", self.us, batch.len(), remote_host);
        let mut report = MergeReport::default();

        for signed in &batch {
            match self.merge_message(signed, local, resolver).await {
                Ok(Some(new_members)) => {
                    report.admitted += 1;
                    report.new_members.extend(new_members);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!(
                        "{} rejected entry {} from {}: {}",
                        self.us,
                        self.cursor_of(remote_host).unwrap_or_default(),
                        remote_host,
                        e
                    );
                    return Err(e);
                }
            }
            if let Some(host) = self.members.get_mut(remote_host) {
                host.messages_merged_upto += 1;
            }
            report.examined += 1;
        }

        log::info!(
            "{} merged from {}: {} examined, {} admitted, {} new members",
            self.us,
            remote_host,
            report.examined,
            report.admitted,
            report.new_members.len()
        );
        Ok(report)
    }

    /// Admit one entry. `Ok(None)` means it was already known.
    async fn merge_message<L, I>(
        &mut self,
        signed: &SignedMessage,
        local: &L,
        resolver: &I,
    ) -> Result<Option<Vec<Id>>, ChatError>
    where
        L: MessageStore + ?Sized,
        I: IdentityResolver + ?Sized,
    {
        let message = &signed.message;
        if message.timestamp.is_before_or_equal(&self.current) {
            return Ok(None);
        }

        // Nothing below touches `self` until the local append succeeds.
        let mut staged: BTreeMap<Id, Member> = BTreeMap::new();
        for new_id in self.current.new_members_from(&message.timestamp) {
            let parent = new_id.parent()?;
            let parent_cursor = staged
                .get(&parent)
                .or_else(|| self.members.get(&parent))
                .map(|m| m.messages_merged_upto)
                .ok_or_else(|| ChatError::UnknownMember(parent.clone()))?;
            let (username, identity) = self.find_invite(&new_id, &parent, message)?;
            staged.insert(
                new_id.clone(),
                Member::new(new_id, username, identity, parent_cursor),
            );
        }

        let mut author = staged
            .get(&message.author)
            .or_else(|| self.members.get(&message.author))
            .cloned()
            .ok_or_else(|| ChatError::UnknownMember(message.author.clone()))?;
        if !author.has_joined() {
            author = admit_join(&author, message, resolver).await?;
        }

        let verified = match author.chat_public_key {
            Some(key) => matches!(signed.verify(&key), Ok(true)),
            None => false,
        };
        if !verified {
            return Err(ChatError::InvalidSignature(author.id));
        }

        local.add_message(signed).await?;

        let new_members: Vec<Id> = staged.keys().cloned().collect();
        for id in &new_members {
            log::info!("{} discovered member {}", self.us, id);
        }
        self.members.extend(staged);
        self.members.insert(author.id.clone(), author);
        self.messages.push(signed.clone());
        self.current = self.current.merge(&message.timestamp);
        log::debug!("{} admitted entry from {}", self.us, message.author);
        Ok(Some(new_members))
    }

    /// Username and identity for `id`, from the Invite its parent issued.
    /// The Invite is either `message` itself or an already admitted entry.
    fn find_invite(
        &self,
        id: &Id,
        parent: &Id,
        message: &Message,
    ) -> Result<(String, PublicKeyHash), ChatError> {
        let candidates = std::iter::once(message).chain(self.messages.iter().rev().map(|s| &s.message));
        for candidate in candidates.filter(|m| &m.author == parent) {
            if let Ok(MessageBody::Invite {
                id: invited,
                username,
                identity,
            }) = candidate.decode_body()
            {
                if &invited == id {
                    return Ok((username, identity));
                }
            }
        }
        Err(ChatError::MissingInvite(id.clone()))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn us(&self) -> &Id {
        &self.us
    }

    /// This replica's own member record.
    pub fn us_member(&self) -> Result<&Member, ChatError> {
        self.members
            .get(&self.us)
            .ok_or_else(|| ChatError::UnknownMember(self.us.clone()))
    }

    pub fn member(&self, id: &Id) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn member_by_username(&self, username: &str) -> Option<&Member> {
        self.members.values().find(|m| m.username == username)
    }

    /// All members, ordered by Id.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn messages(&self) -> &[SignedMessage] {
        &self.messages
    }

    pub fn messages_from(&self, index: u64) -> Result<&[SignedMessage], ChatError> {
        let len = self.messages.len() as u64;
        if index > len {
            return Err(StoreError::IndexOutOfRange { index, len }.into());
        }
        Ok(&self.messages[index as usize..])
    }

    pub fn current(&self) -> &TreeClock {
        &self.current
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn to_bytes(&self) -> Result<Vec<u8>, ChatError> {
        let state = ChatState {
            us: self.us.clone(),
            current: self.current.clone(),
            members: self.members.values().cloned().collect(),
            messages: self.messages.clone(),
        };
        Ok(cbor_encode(&state)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Chat, ChatError> {
        let state: ChatState = cbor_decode(bytes)?;
        let members: BTreeMap<Id, Member> =
            state.members.into_iter().map(|m| (m.id.clone(), m)).collect();
        if !members.contains_key(&state.us) {
            return Err(ChatError::UnknownMember(state.us));
        }
        Ok(Chat {
            us: state.us,
            current: state.current,
            members,
            messages: state.messages,
        })
    }
}

/// Check a newcomer's first entry and return the member with its chat key set.
async fn admit_join<I: IdentityResolver + ?Sized>(
    author: &Member,
    message: &Message,
    resolver: &I,
) -> Result<Member, ChatError> {
    let body = message
        .decode_body()
        .map_err(|e| ChatError::Decode(e.to_string()))?;
    let (identity, chat_identity, chat_public_key) = match body {
        MessageBody::Join {
            identity,
            chat_identity,
            chat_public_key,
            ..
        } => (identity, chat_identity, chat_public_key),
        other => {
            return Err(ChatError::Decode(format!(
                "first entry from {} must be a Join, got {}",
                author.id,
                other.kind()
            )))
        }
    };

    if identity != author.identity || chat_identity.owned_key != author.identity {
        return Err(mismatch(&author.id, "Join identity differs from the Invite"));
    }
    let owner = match resolver.resolve_owner(&chat_identity).await {
        Ok(owner) => owner,
        Err(ResolverError::InvalidProof(e)) => return Err(mismatch(&author.id, e.to_string())),
        Err(e) => return Err(e.into()),
    };
    if owner != PublicKeyHash::from_public_key(&chat_public_key) {
        return Err(mismatch(&author.id, "proof owner is not the published chat key"));
    }
    Ok(author.with_chat_id(chat_identity, chat_public_key))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
