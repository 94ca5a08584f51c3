//! Structured logging for the Tally runtime.

pub mod logger;

pub use logger::init_logger;
