//! Request-deduplication guard.
//!
//! A call is accepted when it is the first to claim the key derived from its
//! operation identifier and arguments, and rejected while that claim is live.
//! Claims live in a shared [`store::ClaimStore`] and expire on their own.

pub mod api;
pub mod common;
pub mod config;
pub mod dedup;
pub mod store;
