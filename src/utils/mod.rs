//! Formatting and memory estimate helpers.

mod memory;

pub use memory::{format_bytes, format_count, MemoryEstimate};
