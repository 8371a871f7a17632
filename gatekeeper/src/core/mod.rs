//! Deterministic, pure logic shared by the trust layer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod digest;
pub mod identity;
pub mod scope;
pub mod types;
