//! Common library for monodoc
//!
//! Types shared by the client core and the execution side it talks to.
//!
//! Modules:
//! * `error`: Defines error types and handling.
//! * `value`: The tagged value tree and input normalization.
//! * `ast`: The compiled expression tree.
//! * `protocol`: Requests, responses and statement options.

pub mod ast;
pub mod error;
pub mod protocol;
pub mod value;

// Re-export commonly used types at the base
pub use error::*;
pub use value::{Document, IntoDocument, Record, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
