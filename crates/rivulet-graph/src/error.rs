//! Graph construction and lowering errors.

use rivulet_ir::{ExprError, OpError};
use thiserror::Error;

/// An error raised while building or lowering a query graph.
///
/// All variants abort construction or compilation immediately; no partial
/// graph or partial operator is left in a usable state.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("{0} operator cannot be defined after a window operator")]
    AfterWindow(&'static str),

    #[error("reduce must be defined immediately after a window operator")]
    ReduceWithoutWindow,

    #[error("cannot compile a graph whose final operator is a window")]
    TerminalWindow,

    #[error("sliding windows are not supported: size {size} != stride {stride}")]
    SlidingWindow { size: i64, stride: i64 },

    #[error("{op} operator defined without a valid upstream output")]
    UnboundOutput { op: String },

    #[error("{op} operator expects {expected} upstream operator(s), found {found}")]
    WrongArity {
        op: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Op(#[from] OpError),
}
