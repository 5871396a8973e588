//! Bounded History Buffer
//!
//! Fixed-capacity buffer keeping the most recent entries; pushing into a
//! full buffer evicts the oldest entry.

mod buffer;

pub use buffer::RingBuffer;
