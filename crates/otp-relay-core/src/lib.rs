//! Core domain + application logic for the OTP relay.
//!
//! This crate is intentionally framework-agnostic. Telegram and the HTTP status API
//! live behind ports (traits) implemented in adapter crates.

pub mod admin;
pub mod config;
pub mod domain;
pub mod errors;
pub mod fanout;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod source;
pub mod store;
pub mod worker;

pub use errors::{Error, Result};
