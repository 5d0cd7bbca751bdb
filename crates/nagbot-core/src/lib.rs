//! Core domain + application logic for the nagbot reminder bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind a
//! port (trait) implemented in the adapter crate.

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod scheduler;
pub mod session;
pub mod store;

pub use errors::{Error, Result};
