//! Content-addressed id generation.
//!
//! Ids are the first 10 hex characters of a SHA-256 digest taken over a
//! domain-separation tag byte followed by each part, length-prefixed with a
//! big-endian `u32`. Length-prefixing is load-bearing: without it `["a","b"]`
//! and `["a|b"]` would hash identically whenever parts are simply joined.

use sha2::{Digest, Sha256};

const ID_HEX_LEN: usize = 10;

/// Domain-separation tags, one per kind of id this crate mints. Keeping them
/// distinct means a task and a worker built from coincidentally identical
/// parts never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Task,
    Worker,
    Checkpoint,
}

impl IdKind {
    fn tag(self) -> u8 {
        match self {
            IdKind::Task => 0x01,
            IdKind::Worker => 0x02,
            IdKind::Checkpoint => 0x03,
        }
    }
}

/// Hash `parts` under `kind`'s domain separation tag, returning the first
/// [`ID_HEX_LEN`] hex characters of the SHA-256 digest.
pub fn content_id<'a>(kind: IdKind, parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update([kind.tag()]);
    for part in parts {
        let bytes = part.as_bytes();
        hasher.update((bytes.len() as u32).to_be_bytes());
        hasher.update(bytes);
    }
    let digest = hasher.finalize();
    hex::encode(digest)[..ID_HEX_LEN].to_string()
}

/// Id for a task created from `(kind, payload...)` parts: SHA-256 over
/// length-prefixed parts, truncated to 10 hex characters.
pub fn task_id<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    content_id(IdKind::Task, parts)
}

/// Stable worker id derived from a gateway session key.
pub fn worker_id(session_key: &str) -> String {
    content_id(IdKind::Worker, [session_key])
}

/// Checkpoint id derived from its creation timestamp (rfc3339) and name.
pub fn checkpoint_id(name: &str, created_at: &str) -> String {
    content_id(IdKind::Checkpoint, [name, created_at])
}
