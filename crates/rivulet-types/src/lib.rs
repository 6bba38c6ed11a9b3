//! Type system for the Rivulet streaming query frontend.
//!
//! This crate provides:
//! - Payload type definitions (`DataType`)
//! - Iteration intervals over the time axis (`Iter`)
//! - Stream/value types pairing the two (`Type`)

pub mod types;

pub use types::{DataType, Iter, Type};
