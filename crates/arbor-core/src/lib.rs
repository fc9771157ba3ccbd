//! # arbor-core
//!
//! Core types, traits, and abstractions for the arbor CMS engine.
//!
//! This crate provides the article lifecycle state machine, the signature
//! approval gate, the category hierarchy model, and the trait definitions
//! that the persistence crates depend on. It performs no I/O.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod signature;
pub mod stage;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use config::CmsConfig;
pub use error::{Error, Result};
pub use models::*;
pub use signature::{SignatureApprovalGate, SignatureFilter, SignaturePredicate};
pub use stage::derive_stage;
pub use traits::*;
pub use uuid_utils::new_v7;
