//! Core types and error definitions for Folio.
//!
//! Folio answers questions about a professional profile with retrieval
//! augmented generation, a semantic response cache and per-session
//! conversation memory. This crate holds the types every other crate shares.
//!
//! # Main types
//!
//! - [`FolioError`]: Unified error enum for all Folio subsystems.
//! - [`FolioResult`]: Convenience alias for `Result<T, FolioError>`.
//! - [`Outcome`]: Result of a best-effort operation (ready, disabled, failed).
//! - [`Role`] / [`ChatMessage`]: Conversation turns sent by the caller.

/// Error types.
pub mod error;
/// Conversation message types.
pub mod message;
/// Outcome type for best-effort operations.
pub mod outcome;

pub use error::{FolioError, FolioResult};
pub use message::{ChatMessage, Role};
pub use outcome::Outcome;
