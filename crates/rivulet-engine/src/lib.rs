//! Execution engine contract, reference interpreter and session.
//!
//! This crate provides:
//! - Runtime payload values (`value`)
//! - The time-indexed region buffer (`region`)
//! - The `Engine` compile/execute contract and a tree-walking reference
//!   interpreter over the lowered IR (`engine`, `eval`)
//! - The `Session` lifecycle object tying a query graph, its buffers and
//!   an engine together (`session`)

pub mod engine;
mod eval;
pub mod region;
pub mod session;
pub mod value;

pub use engine::{CompiledQuery, Engine, EngineError, Interpreter};
pub use region::{Region, RegionError};
pub use session::{LifecycleError, Session, SessionError};
pub use value::Value;
