//! Shared domain primitives for sending-identity verification.
//!
//! This crate owns the deterministic parts of the verify-then-unblock flow:
//! custom resource contracts, physical identifiers, DKIM record naming, and the
//! resource graph that orders the user pool after verification. It
//! intentionally excludes AWS SDK and Lambda runtime concerns.

pub mod contract;
pub mod dkim;
pub mod error;
pub mod graph;
pub mod stack;
