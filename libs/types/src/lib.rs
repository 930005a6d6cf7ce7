//! Shared kernel for feed reconciliation
//!
//! Type definitions used by every crate that consumes or produces
//! exchange feed state, kept free of engine logic so adapters can depend
//! on them without pulling in the reconciler.
//!
//! # Modules
//! - `ids`: Identifiers (Symbol, FeedId, FeedKey, RequestId)
//! - `time`: Unix-nanosecond clock helpers
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod time;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::time::*;
    pub use crate::errors::*;
}
