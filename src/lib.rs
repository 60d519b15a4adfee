//! Turnstile - fixed-window request rate limiting
//!
//! This crate decides, for a caller-supplied identifier and policy, whether an
//! operation may proceed. Window state lives in an injected, concurrently
//! accessible store; a sweeper reclaims windows of identifiers that stop
//! showing up.

pub mod config;
pub mod error;
pub mod ratelimit;
