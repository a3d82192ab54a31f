/// Chat guardrails.
///
/// These constants bound message size, merge batch size, and on-disk frame
/// size so a hostile or corrupted peer log cannot exhaust memory.

/// Max encoded payload size per message.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024; // 64 KB

/// Default max messages examined from one peer log per merge call.
pub const MAX_MESSAGES_PER_MERGE: usize = 1_000;

/// Max size of one stored frame: payload limit + clock, author and signature overhead.
pub const MAX_FRAME_BYTES: usize = MAX_PAYLOAD_BYTES + 16 * 1024;

/// Max members invited by a single member (bounds the clock fan-out per node).
pub const MAX_INVITES_PER_MEMBER: u32 = 4_096;
