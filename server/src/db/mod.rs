//! Storage Layer
//!
//! Redis-backed best-effort durable store for room descriptors and bounded
//! history lists. The store is optional at runtime: when unreachable, the
//! server runs with persistence disabled rather than refusing to start.

mod kv;

pub use kv::{keys, KvError, KvStore, CHAT_HISTORY_BOUND, WHITEBOARD_HISTORY_BOUND};
