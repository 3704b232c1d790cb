//! In-memory latest-value plumbing between polling monitors and readers.

mod bus;

pub use bus::*;
