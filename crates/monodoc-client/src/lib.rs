//! monodoc client core
//!
//! Builds document-store statements (find, add, modify, remove) over a
//! [`Transport`], compiling filter, sort, grouping and projection text into
//! expression trees and generating document identifiers on insert.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use monodoc_client::{ClientConfig, MemoryTransport, ServerVersion, Session};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> monodoc_client::Result<()> {
//!     let transport = Arc::new(MemoryTransport::new(ServerVersion::new(8, 0, 19)));
//!     let session = Session::open(transport, &ClientConfig::default()).await?;
//!
//!     let books = session.ensure_collection("books").await?;
//!     books.add(json!({"title": "Book 1", "pages": 20}))?.execute().await?;
//!
//!     let mut found = books
//!         .find("pages > :min")?
//!         .bind("min", 10)
//!         .execute()
//!         .await?;
//!     while let Some(doc) = found.fetch_one() {
//!         println!("{doc:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod binder;
pub mod collection;
pub mod config;
pub mod expr;
pub mod identity;
pub mod lock;
pub mod memory;
pub mod result;
pub mod session;
pub mod statement;
pub mod transport;

pub use binder::{Bindings, IntoBindings};
pub use collection::Collection;
pub use config::{ClientConfig, ConfigLoader};
pub use identity::{IdentitySource, SystemClock, TimeSource};
pub use memory::MemoryTransport;
pub use result::{AddResult, DocResult, UpdateResult};
pub use session::Session;
pub use statement::{AddStatement, FindStatement, ModifyStatement, RemoveStatement};
pub use transport::Transport;

pub use monodoc_common::{
    DocError, Document, IntoDocument, Record, Result, Value,
    protocol::{LockContention, ServerVersion},
};

#[cfg(test)]
mod tests;
