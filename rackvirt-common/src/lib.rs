//! # rackvirt Common
//!
//! Shared utilities for the rackvirt components.
//!
//! ## Logging
//!
//! ```rust
//! use rackvirt_common::init_logging;
//!
//! init_logging("info").unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
