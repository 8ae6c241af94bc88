//! Async runtime facade for the sync workspace.
//!
//! Every `core-*` and `bridge-*` crate goes through this crate instead of
//! depending on tokio directly, so the executor can be swapped in one place.
//!
//! # Modules
//!
//! - `fs`: Directory and file helpers
//! - `task`: Task spawning and join handles
//! - `time`: Sleep, timeouts, instants and wall-clock helpers
//! - `sync`: Async-aware locks and channels
//! - `runtime`: `block_on` for sync entry points and tests
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod fs;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
