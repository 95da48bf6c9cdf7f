//! Persistence layer for Strongroom.
//!
//! Services depend only on the repository traits in [`store`]; two backends
//! implement them:
//! - [`MemoryStore`] for tests and ephemeral runs
//! - [`SqliteStore`] for a single-file database
//!
//! Stores hold ciphertext and item keys as opaque bytes. Every call a
//! service makes is wrapped in a [`StoreDeadline`].

pub mod deadline;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use deadline::StoreDeadline;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{DataItemStore, DataVersionStore, SessionStore, UserStore};
