//! Dataflow operators and graph-to-IR lowering.
//!
//! A query is written as a DAG of logical operators (source, map, where,
//! tumbling window, windowed reduce, three temporal-join variants). A
//! compile request on the terminal node lowers the DAG bottom-up into a
//! single loop operator tree: each node folds its predecessors' partially
//! lowered builders into one, joins merging two independently built
//! fragments without symbol or input duplication.

pub mod error;
pub mod graph;
pub mod operator;

pub use error::GraphError;
pub use graph::{GraphCtx, GraphNode};
pub use operator::{AccFn, JoinFn, MapFn, Operator, PredFn, SourceOp};
