//! Core domain types for patchbay.
//!
//! This crate provides the foundational identifier types shared by the
//! integration framework and the built-in connectors.

pub mod id;

pub use id::{OwnerId, ParseIdError, ProviderId, SessionId};
