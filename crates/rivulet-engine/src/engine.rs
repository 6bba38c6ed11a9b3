//! The compile/execute engine contract and the reference interpreter.

use rivulet_ir::{Op, Symbol};
use rivulet_types::DataType;
use thiserror::Error;
use tracing::debug;

use crate::eval;
use crate::region::{Region, RegionError};

/// An error raised during query compilation or execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("query expects {expected} input buffer(s), found {found}")]
    InputArity { expected: usize, found: usize },

    #[error("input buffer '{input}' does not match the declared stream type")]
    InputSchema { input: String },

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("type error during evaluation: {0}")]
    Type(String),

    #[error("integer division by zero")]
    DivideByZero,

    #[error("integer overflow")]
    Overflow,

    #[error(transparent)]
    Region(#[from] RegionError),
}

/// A compiled query: an opaque handle pairing the lowered operator with
/// its name. What "compiled" means is up to the engine; for the
/// interpreter it is the operator itself.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    name: String,
    op: Op,
}

impl CompiledQuery {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered input symbols; execution buffers are supplied positionally
    /// against this list.
    pub fn inputs(&self) -> &[Symbol] {
        &self.op.inputs
    }

    /// Payload type of the query result stream.
    pub fn output_dtype(&self) -> DataType {
        self.op.output_dtype()
    }

    pub(crate) fn op(&self) -> &Op {
        &self.op
    }
}

/// The execution contract every backend implements.
///
/// `compile` turns a lowered operator into an executable artifact once;
/// `execute` runs it over a time range against caller-owned buffers and
/// may be called repeatedly.
pub trait Engine {
    fn compile(&self, op: &Op, name: &str) -> Result<CompiledQuery, EngineError>;

    fn execute(
        &self,
        query: &CompiledQuery,
        t_start: i64,
        t_end: i64,
        out: &mut Region,
        ins: &[&Region],
    ) -> Result<(), EngineError>;
}

/// The reference engine: a tree-walking interpreter over the lowered IR.
#[derive(Debug, Default)]
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for Interpreter {
    fn compile(&self, op: &Op, name: &str) -> Result<CompiledQuery, EngineError> {
        debug!(query = name, "compiled:\n{op}");
        Ok(CompiledQuery {
            name: name.to_string(),
            op: op.clone(),
        })
    }

    fn execute(
        &self,
        query: &CompiledQuery,
        t_start: i64,
        t_end: i64,
        out: &mut Region,
        ins: &[&Region],
    ) -> Result<(), EngineError> {
        debug!(query = query.name(), t_start, t_end, "executing");
        eval::run(query.op(), t_start, t_end, out, ins)
    }
}
