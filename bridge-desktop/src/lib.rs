//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! - `LocalStore` backed by SQLite ([`SqliteLocalStore`])
//! - `LocalStore` held in process memory ([`MemoryLocalStore`]) for tests and
//!   ephemeral hosts
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::SqliteLocalStore;
//!
//! #[core_async::main]
//! async fn main() {
//!     let store = SqliteLocalStore::new("data/local_store.db".into()).await.unwrap();
//!     // Hand it to CoreConfig::builder().local_store(Arc::new(store))
//! }
//! ```

mod local_store;

pub use local_store::{MemoryLocalStore, SqliteLocalStore};
