//! Keygate - multi-tenant license validation and heartbeat server
//!
//! This library provides the core of the Keygate licensing service: the
//! validation state machine, HMAC lookup-key derivation, encrypted license
//! key storage, heartbeat/seat tracking, and the HTTP surface around them.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod util;
pub mod validation;
