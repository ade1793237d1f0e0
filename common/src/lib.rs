//! StockGuard Common Types
//!
//! Shared types for the StockGuard concurrency layer: the error taxonomy,
//! lock and entity identifiers, per-call operation results and the
//! cancellation signal accepted by every waiting operation.

pub mod cancel;
pub mod error;
pub mod identifiers;
pub mod outcome;
pub mod time;

pub use cancel::*;
pub use error::*;
pub use identifiers::*;
pub use outcome::*;
pub use time::*;
