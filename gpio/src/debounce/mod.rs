//! Filters for noisy inputs.
mod timed;

pub use timed::EdgeDebounce;
