//! Error handling foundation shared by every autoflow crate.
//!
//! Crates define their own error enums next to the code that raises them
//! and return them wrapped in a rootcause [`Report`], so callers can attach
//! layer-specific context as an error travels up.

use rootcause::Report;

/// Result alias over rootcause's `Report`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
