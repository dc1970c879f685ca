//! Redline scheduling primitives
//!
//! Cooperative cancellation for session-scoped operations and a structured
//! retry policy with exponential backoff.
//!
//! # Example
//!
//! ```
//! use redline_scheduler::{CancellationRegistry, RetryPolicy};
//! use std::time::Duration;
//!
//! let registry = CancellationRegistry::new();
//! let load_token = registry.register("load");
//!
//! let policy = RetryPolicy::default().with_max_attempts(3);
//! assert_eq!(policy.delay_after(1), Duration::from_millis(500));
//!
//! // Session teardown abandons whatever is still running.
//! registry.cancel_all();
//! assert!(load_token.is_cancelled());
//! ```

pub mod cancel;
pub mod retry;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use retry::{retry, RetryError, RetryPolicy};
