//! Loop IR for the Rivulet streaming query frontend.
//!
//! This crate provides:
//! - The typed expression model (`expr`)
//! - The loop operator and its mutable builder (`op`)
//! - A plain-text IR printer (`printer`)
//!
//! The IR describes bounded iteration over a time axis: each `Op` runs
//! once per integer step of its interval, evaluates an ordered symbol
//! table, and emits at most one value per step, gated by a predicate.

pub mod expr;
pub mod op;
pub mod printer;

pub use expr::{ConstVal, Expr, ExprError, ExprKind, MathOp, StepFn, Symbol};
pub use op::{Op, OpBuilder, OpError};
