//! Content fingerprints.
//!
//! Two pure functions drive cheap change detection:
//!
//! - [`entry_hash`]: SHA-256 over the content bytes, followed by the sorted,
//!   de-duplicated tag list. Each tag is written as a `0x1F` separator, its
//!   byte length as a big-endian `u64`, then its bytes. Untagged entries
//!   hash to the plain content digest.
//! - [`global_hash`]: SHA-256 over the concatenated entry hashes, ordered
//!   by entry id. A missing hash contributes the empty string.
//!
//! Both sides of a sync must use these functions; a replica hashing with a
//! different input would silently miss tag-only edits.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

const TAG_SEPARATOR: u8 = 0x1F;

/// Anything that contributes to a global hash.
pub trait Fingerprinted {
    /// The entry id.
    fn id(&self) -> Uuid;

    /// The stored fingerprint, if any.
    fn hash(&self) -> Option<&str>;
}

/// Computes the canonical hash of an entry body.
pub fn entry_hash(content: &str, tags: Option<&[String]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());

    if let Some(tags) = tags {
        let mut canonical: Vec<&str> = tags.iter().map(String::as_str).collect();
        canonical.sort_unstable();
        canonical.dedup();
        for tag in canonical {
            hasher.update([TAG_SEPARATOR]);
            hasher.update((tag.len() as u64).to_be_bytes());
            hasher.update(tag.as_bytes());
        }
    }

    hex::encode(hasher.finalize())
}

/// Computes the order-independent digest of an entry set.
///
/// Entries are ordered by id. `Uuid`'s byte ordering matches the
/// lexicographic ordering of its lowercase hyphenated form.
pub fn global_hash<'a, T, I>(entries: I) -> String
where
    T: Fingerprinted + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut sorted: Vec<(Uuid, &str)> = entries
        .into_iter()
        .map(|e| (e.id(), e.hash().unwrap_or("")))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (_, hash) in sorted {
        hasher.update(hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}
