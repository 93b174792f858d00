//! Shared domain types for Switchyard.
//!
//! Everything here is dependency-light and consumed by every other crate:
//! the error taxonomy, time-sortable identifiers, the message/part model,
//! the permission protocol types, the configuration tree, provider stream
//! events, and the tool trait.

pub mod config;
pub mod error;
pub mod ident;
pub mod message;
pub mod permission;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
pub use ident::Id;
