// Chunked binary transfer over a size-limited message channel
//
// - codec: splits a buffer into size-bounded chunk descriptors
// - store: reassembles inbound chunks per transfer id, with an idle TTL
// - outbox: holds outbound chunked results until the peer fetches them
// - b64: serde helpers so raw bytes travel as base64 strings

pub mod b64;
pub mod codec;
pub mod outbox;
pub mod store;

pub use codec::*;
pub use outbox::*;
pub use store::*;
