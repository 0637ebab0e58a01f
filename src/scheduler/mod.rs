//! Scheduling primitives and the swap driver
//!
//! - `ActionLocks` serializes broadcasts per wallet, network and asset
//! - `IntervalThrottle` spaces out chain polls per swap and status
//! - `RetryPolicy` bounds retries of chain-time queries
//! - `SwapDriver` owns the timer loop that steps persisted swaps

pub mod driver;
pub mod interval;
pub mod lock;
pub mod retry;

pub use driver::SwapDriver;
pub use interval::IntervalThrottle;
pub use lock::{ActionLocks, LockKey};
pub use retry::RetryPolicy;
