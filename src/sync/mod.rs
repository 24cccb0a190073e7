//! Client side of progress synchronization.
//!
//! Devices push their rows to the sync server, which merges them into the
//! owner's authoritative copy, then pull the merged view back. Every merge
//! on either side uses [`crate::Merge`], so repeated or reordered syncs
//! converge on the same state.

mod client;

pub use client::{PushAck, SyncClient, SyncError, SyncReport};
