//! # donorlink-core
//!
//! Core types, event contract, and collaborator traits for the DonorLink
//! real-time client.
//!
//! This crate provides the data structures and trait definitions that the
//! coordinator (`donorlink-realtime`) and UI consumers depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{names, Command, Event};
pub use models::*;
pub use traits::*;
