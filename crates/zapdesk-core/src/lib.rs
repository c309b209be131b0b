//! # zapdesk-core
//!
//! Core types, traits, configuration, and error handling for the Zapdesk
//! WhatsApp connection manager.

pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod traits;
