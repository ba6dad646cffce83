//! Shared error plumbing used across the courier crates.

pub mod error;

pub use error::FromMessage;
