//! AWS-oriented adapters and handlers for sending-identity verification.
//!
//! This crate owns runtime integration details: the custom resource Lambda
//! handler, the status poller, DKIM record reconciliation, and the SES,
//! Route53, and response-URL adapters. Deterministic contracts and resource
//! ordering live in `identity_verifier_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod poller;
pub mod reconciler;
pub mod telemetry;
