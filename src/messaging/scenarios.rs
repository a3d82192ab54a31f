//! End-to-end replication scenarios across several replicas.

use std::collections::BTreeSet;

use crate::messaging::chat::Chat;
use crate::messaging::id::Id;
use crate::messaging::message::SignedMessage;
use crate::messaging::resolver::KeyDirectory;
use crate::messaging::store::{MemoryMessageStore, MessageStore};
use crate::messaging::test_support::{found, invite, Participant};

async fn log_set(store: &MemoryMessageStore) -> BTreeSet<Vec<u8>> {
    store
        .snapshot()
        .await
        .iter()
        .map(|m| m.to_bytes().unwrap())
        .collect()
}

fn member_ids(chat: &Chat) -> Vec<Id> {
    chat.members().map(|m| m.id.clone()).collect()
}

#[tokio::test]
async fn test_basic_chat() {
    let directory = KeyDirectory::new();
    let (mut chat1, user1) = found(&directory, "user1").await;
    let (mut chat2, user2) = invite(&mut chat1, &user1, "user2", &directory).await;

    let welcome = user1.post(&mut chat1, "Welcome!").await;
    chat2
        .merge(chat1.us(), &user1.store, &user2.store, &directory)
        .await
        .unwrap();
    assert_eq!(user2.store.get(3).await, Some(welcome));

    let reply = user2.post(&mut chat2, "This is cool!").await;
    chat1
        .merge(chat2.us(), &user2.store, &user1.store, &directory)
        .await
        .unwrap();
    assert_eq!(user1.store.get(4).await, Some(reply));
    assert!(chat1.member(chat2.us()).unwrap().has_joined());
}

#[tokio::test]
async fn test_multiple_invites_get_distinct_ids() {
    let directory = KeyDirectory::new();
    let (mut chat1, user1) = found(&directory, "user1").await;
    let (chat2, _user2) = invite(&mut chat1, &user1, "user2", &directory).await;
    let (chat3, _user3) = invite(&mut chat1, &user1, "user3", &directory).await;

    assert_ne!(chat2.us(), chat3.us());
    assert_eq!(chat2.us().parent().unwrap(), Id::creator());
    assert_eq!(chat3.us().parent().unwrap(), Id::creator());
}

#[tokio::test]
async fn test_concurrent_invites_from_copies_are_distinct() {
    let directory = KeyDirectory::new();
    let (mut chat1, user1) = found(&directory, "user1").await;
    let (mut chat2, user2) = invite(&mut chat1, &user1, "user2", &directory).await;
    let (mut chat3, user3) = invite(&mut chat1, &user1, "user3", &directory).await;

    // user2 and user3 both hold copies of user1's state and invite before any merge.
    let (chat4, _) = invite(&mut chat2, &user2, "user4", &directory).await;
    let (chat5, _) = invite(&mut chat3, &user3, "user5", &directory).await;
    let (chat6, _) = invite(&mut chat1, &user1, "user6", &directory).await;

    let ids: BTreeSet<Id> = [chat4.us(), chat5.us(), chat6.us()].into_iter().cloned().collect();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_message_propagation_along_invite_chain() {
    let directory = KeyDirectory::new();
    let (mut chat1, user1) = found(&directory, "user1").await;
    let (mut chat2, user2) = invite(&mut chat1, &user1, "user2", &directory).await;
    let (mut chat3, user3) = invite(&mut chat2, &user2, "user3", &directory).await;

    let hey = user3.post(&mut chat3, "Hey All!").await;
    chat2
        .merge(chat3.us(), &user3.store, &user2.store, &directory)
        .await
        .unwrap();
    assert_eq!(user2.store.get(5).await, Some(hey.clone()));

    let report = chat1
        .merge(chat2.us(), &user2.store, &user1.store, &directory)
        .await
        .unwrap();
    assert_eq!(user1.store.get(5).await, Some(hey));
    assert_eq!(report.new_members, vec![chat3.us().clone()]);

    // user1 learned user3 transitively, with user3's chat key.
    let user3_seen = chat1.member(chat3.us()).unwrap();
    assert!(user3_seen.has_joined());
    assert_eq!(user3_seen.username, "user3");
    assert_eq!(member_ids(&chat1), member_ids(&chat3));
}

#[tokio::test]
async fn test_partition_and_reconcile() {
    let directory = KeyDirectory::new();
    let mut users = Vec::new();
    for _ in 0..4 {
        users.push(Participant::new(&directory).await);
    }
    let hashes: Vec<_> = users.iter().map(|u| u.hash()).collect();
    let mut chats = Chat::create_new_group(&["user1", "user2", "user3", "user4"], &hashes).unwrap();
    for (chat, user) in chats.iter_mut().zip(&users) {
        user.join(chat).await;
    }
    let mut chat4 = chats.pop().unwrap();
    let mut chat3 = chats.pop().unwrap();
    let mut chat2 = chats.pop().unwrap();
    let mut chat1 = chats.pop().unwrap();
    let (u1, u2, u3, u4) = (&users[0], &users[1], &users[2], &users[3]);

    // user1 and user2 talk.
    u1.post(&mut chat1, "Hey All, I'm user1!").await;
    chat2.merge(chat1.us(), &u1.store, &u2.store, &directory).await.unwrap();
    u2.post(&mut chat2, "Hey user1! I'm user2.").await;
    chat1.merge(chat2.us(), &u2.store, &u1.store, &directory).await.unwrap();
    u1.post(&mut chat1, "Hey user2, whats up?").await;
    chat2.merge(chat1.us(), &u1.store, &u2.store, &directory).await.unwrap();
    u2.post(&mut chat2, "Just saving the world one decentralized chat at a time..").await;
    chat1.merge(chat2.us(), &u2.store, &u1.store, &directory).await.unwrap();
    assert!(log_set(&u2.store).await.is_superset(&log_set(&u1.store).await));
    assert_eq!(u2.store.len().await.unwrap(), 6);

    // Meanwhile user3 and user4 talk.
    u3.post(&mut chat3, "Hey All, I'm user3!").await;
    chat4.merge(chat3.us(), &u3.store, &u4.store, &directory).await.unwrap();
    u4.post(&mut chat4, "Hey user3! I'm user4.").await;
    chat3.merge(chat4.us(), &u4.store, &u3.store, &directory).await.unwrap();
    u3.post(&mut chat3, "Hey user4, whats up?").await;
    chat4.merge(chat3.us(), &u3.store, &u4.store, &directory).await.unwrap();
    u4.post(&mut chat4, "Just saving the world one encrypted chat at a time..").await;
    chat3.merge(chat4.us(), &u4.store, &u3.store, &directory).await.unwrap();
    assert!(log_set(&u4.store).await.is_superset(&log_set(&u3.store).await));
    assert_eq!(u4.store.len().await.unwrap(), 6);

    // The partition heals.
    chat1.merge(chat4.us(), &u4.store, &u1.store, &directory).await.unwrap();
    assert_eq!(u1.store.len().await.unwrap(), 12);
    chat2.merge(chat1.us(), &u1.store, &u2.store, &directory).await.unwrap();
    assert!(log_set(&u2.store).await.is_superset(&log_set(&u1.store).await));
    assert_eq!(chat1.current(), chat2.current());
}

#[tokio::test]
async fn test_merge_is_idempotent() {
    let directory = KeyDirectory::new();
    let (mut chat1, user1) = found(&directory, "user1").await;
    let (mut chat2, user2) = invite(&mut chat1, &user1, "user2", &directory).await;
    user2.post(&mut chat2, "one").await;
    user2.post(&mut chat2, "two").await;

    chat1.merge(chat2.us(), &user2.store, &user1.store, &directory).await.unwrap();
    let after_first = chat1.clone();
    let log_len = user1.store.len().await.unwrap();

    let report = chat1
        .merge(chat2.us(), &user2.store, &user1.store, &directory)
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(chat1, after_first);

    // Replaying the whole log from a fresh cursor admits nothing either.
    let mut rewound = after_first.clone();
    let replay = MemoryMessageStore::new();
    replay.mirror(&user2.store).await;
    let report = rewound
        .merge(&Id::creator(), &replay, &user1.store, &directory)
        .await
        .unwrap();
    assert_eq!(report.admitted, 0);
    assert_eq!(rewound.messages(), after_first.messages());
    assert_eq!(rewound.current(), after_first.current());
    assert_eq!(user1.store.len().await.unwrap(), log_len);
}

#[tokio::test]
async fn test_replicas_converge() {
    let directory = KeyDirectory::new();
    let (mut chat1, user1) = found(&directory, "user1").await;
    let (mut chat2, user2) = invite(&mut chat1, &user1, "user2", &directory).await;
    let (mut chat3, user3) = invite(&mut chat1, &user1, "user3", &directory).await;

    user1.post(&mut chat1, "from 1").await;
    user2.post(&mut chat2, "from 2").await;
    user3.post(&mut chat3, "from 3").await;
    user2.post(&mut chat2, "from 2 again").await;

    // Different merge orders on each replica.
    chat1.merge(chat3.us(), &user3.store, &user1.store, &directory).await.unwrap();
    chat1.merge(chat2.us(), &user2.store, &user1.store, &directory).await.unwrap();

    chat2.merge(chat1.us(), &user1.store, &user2.store, &directory).await.unwrap();
    chat2.merge(chat3.us(), &user3.store, &user2.store, &directory).await.unwrap();

    chat3.merge(chat2.us(), &user2.store, &user3.store, &directory).await.unwrap();
    chat3.merge(chat1.us(), &user1.store, &user3.store, &directory).await.unwrap();

    let logs = [
        log_set(&user1.store).await,
        log_set(&user2.store).await,
        log_set(&user3.store).await,
    ];
    assert_eq!(logs[0], logs[1]);
    assert_eq!(logs[1], logs[2]);
    assert_eq!(chat1.current(), chat2.current());
    assert_eq!(chat2.current(), chat3.current());
    assert_eq!(member_ids(&chat1), member_ids(&chat2));
    assert_eq!(member_ids(&chat2), member_ids(&chat3));
    assert!(chat1.members().all(|m| m.has_joined()));
}

#[tokio::test]
async fn test_causal_order_is_preserved() {
    let directory = KeyDirectory::new();
    let (mut chat1, user1) = found(&directory, "user1").await;
    let (mut chat2, user2) = invite(&mut chat1, &user1, "user2", &directory).await;
    let (mut chat3, user3) = invite(&mut chat2, &user2, "user3", &directory).await;

    user1.post(&mut chat1, "question").await;
    chat2.merge(chat1.us(), &user1.store, &user2.store, &directory).await.unwrap();
    user2.post(&mut chat2, "answer").await;
    chat3.merge(chat2.us(), &user2.store, &user3.store, &directory).await.unwrap();
    user3.post(&mut chat3, "follow-up").await;
    chat1.merge(chat2.us(), &user2.store, &user1.store, &directory).await.unwrap();
    chat1.merge(chat3.us(), &user3.store, &user1.store, &directory).await.unwrap();

    for chat in [&chat1, &chat2, &chat3] {
        let log: &[SignedMessage] = chat.messages();
        for (i, first) in log.iter().enumerate() {
            for second in &log[i + 1..] {
                // An entry may never causally precede one admitted before it.
                let precedes = second.timestamp().is_before_or_equal(first.timestamp())
                    && second.timestamp() != first.timestamp();
                assert!(!precedes, "causal order violated in replica {}", chat.us());
            }
        }
    }
}
