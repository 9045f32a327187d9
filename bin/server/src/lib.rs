//! HTTP surface for the autoflow workflow builder.

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
