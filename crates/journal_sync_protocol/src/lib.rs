//! # Journal Sync Protocol
//!
//! Entry types, wire messages and content fingerprints shared by the
//! journal sync server and its client replicas.
//!
//! This crate provides:
//! - `Entry`, `ManifestEntry` and `EntryPreview`
//! - Wire messages for the `/sync` endpoints (status, batch)
//! - Boundary validation that rejects malformed payloads wholesale
//! - The canonical entry hash and the order-independent global hash
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod error;
mod fingerprint;
mod messages;

pub use entry::{Entry, EntryPreview, ManifestEntry, PREVIEW_CHARS};
pub use error::{ProtocolError, ProtocolResult};
pub use fingerprint::{entry_hash, global_hash, Fingerprinted, HASH_HEX_LEN};
pub use messages::{
    parse_entry_id, BatchRequest, BatchResponse, EntryDraft, ErrorBody, StatusResponse,
};
