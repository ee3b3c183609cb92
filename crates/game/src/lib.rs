//! game
//!
//! This crate models the domain objects that the login and gateway
//! services operate on: accounts, realms, characters, in-memory
//! session registration and client references.

#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_import_braces,
    unused_qualifications,
    clippy::unwrap_used,
    clippy::todo,
    clippy::unimplemented
)]

pub mod accounts;
pub mod characters;
pub mod realms;
pub mod sessions;
pub mod types;
