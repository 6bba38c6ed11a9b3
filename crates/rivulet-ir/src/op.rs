//! The loop operator and its mutable builder.

use indexmap::IndexMap;
use rivulet_types::{DataType, Iter, Type};
use thiserror::Error;

use crate::expr::{Expr, Symbol};

/// An error raised while assembling a loop operator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpError {
    #[error("output symbol '{0}' is neither bound in the symbol table nor an input")]
    UndefinedOutput(String),

    #[error("operator predicate must be a boolean value, found {0:?}")]
    NonBooleanPredicate(DataType),

    #[error("builder finished without an output symbol")]
    UnboundOutput,

    #[error("symbol '{0}' is bound to two different expressions during merge")]
    NameCollision(String),
}

/// One unit of the Loop IR.
///
/// Conceptually an `Op` executes once per integer step `t` of `iter`:
/// it evaluates the symbol table in binding order, evaluates `pred`, and
/// if true emits one `(t, output)` tuple; if false it emits nothing for
/// that step. Filtering and sparsity are expressed this way, not via a
/// special absent value.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub iter: Iter,
    /// Ordered input symbols; positions correspond to the runtime buffer
    /// arguments supplied at execution time.
    pub inputs: Vec<Symbol>,
    /// Ordered name -> expression bindings; later bindings may reference
    /// earlier ones, never the other way around.
    pub syms: IndexMap<String, Expr>,
    pub pred: Expr,
    pub output: String,
    /// Auxiliary state bindings.
    pub aux: IndexMap<String, Expr>,
}

impl Op {
    /// Assemble an operator, checking the output and predicate invariants.
    pub fn new(
        iter: Iter,
        inputs: Vec<Symbol>,
        syms: IndexMap<String, Expr>,
        pred: Expr,
        output: impl Into<String>,
        aux: IndexMap<String, Expr>,
    ) -> Result<Op, OpError> {
        let output = output.into();
        if !syms.contains_key(&output) && !inputs.iter().any(|s| s.name == output) {
            return Err(OpError::UndefinedOutput(output));
        }
        if !pred.ty.dtype.is_bool() {
            return Err(OpError::NonBooleanPredicate(pred.ty.dtype.clone()));
        }
        Ok(Op { iter, inputs, syms, pred, output, aux })
    }

    /// Payload type of the per-step output.
    pub fn output_dtype(&self) -> DataType {
        if let Some(e) = self.syms.get(&self.output) {
            e.ty.dtype.clone()
        } else {
            // Op::new guarantees the name resolves to an input.
            self.inputs
                .iter()
                .find(|s| s.name == self.output)
                .map(|s| s.ty.dtype.clone())
                .expect("output resolved at construction")
        }
    }

    /// Stream type of this operator: its output payload over its interval.
    pub fn ty(&self) -> Type {
        Type::new(self.output_dtype(), self.iter)
    }
}

/// Mutable staging structure for an `Op` under construction.
///
/// Dataflow operators fold themselves into a builder during lowering
/// rather than rebuilding the operator from scratch at every node.
#[derive(Debug, Clone)]
pub struct OpBuilder {
    pub iter: Iter,
    pub inputs: Vec<Symbol>,
    pub syms: IndexMap<String, Expr>,
    pub pred: Option<Expr>,
    pub output: Option<Symbol>,
    pub aux: IndexMap<String, Expr>,
}

impl OpBuilder {
    /// A fresh builder over the given interval, with per-instance empty
    /// containers.
    pub fn new(iter: Iter) -> Self {
        Self {
            iter,
            inputs: Vec::new(),
            syms: IndexMap::new(),
            pred: None,
            output: None,
            aux: IndexMap::new(),
        }
    }

    /// Append an input symbol unless one with the same name is present.
    pub fn add_input(&mut self, sym: Symbol) {
        if !self.inputs.iter().any(|s| s.name == sym.name) {
            self.inputs.push(sym);
        }
    }

    /// Bind `sym` to `expr` in the symbol table.
    pub fn bind(&mut self, sym: &Symbol, expr: Expr) {
        self.syms.insert(sym.name.clone(), expr);
    }

    /// Name-keyed, left-biased union of `right` into `self`.
    ///
    /// Inputs, symbol table and aux entries of `right` not already present
    /// by name are appended in their original order; entries whose name is
    /// already taken are treated as already satisfied and dropped. This is
    /// what makes globally unique symbol names a load-bearing precondition:
    /// in release builds a same-named pair binding different expressions is
    /// silently collapsed to the left entry. Debug builds detect the
    /// collision and fail instead.
    pub fn merge(&mut self, right: OpBuilder) -> Result<(), OpError> {
        for input in right.inputs {
            self.add_input(input);
        }
        for (name, expr) in right.syms {
            match self.syms.get(&name) {
                Some(existing) => {
                    if cfg!(debug_assertions) && *existing != expr {
                        return Err(OpError::NameCollision(name));
                    }
                }
                None => {
                    self.syms.insert(name, expr);
                }
            }
        }
        for (name, expr) in right.aux {
            match self.aux.get(&name) {
                Some(existing) => {
                    if cfg!(debug_assertions) && *existing != expr {
                        return Err(OpError::NameCollision(name));
                    }
                }
                None => {
                    self.aux.insert(name, expr);
                }
            }
        }
        Ok(())
    }

    /// Finalize into an `Op`.
    ///
    /// A builder that never had its output set by any lowering step cannot
    /// be finished. A missing predicate defaults to `true`.
    pub fn finish(self) -> Result<Op, OpError> {
        let output = self.output.ok_or(OpError::UnboundOutput)?;
        let pred = self.pred.unwrap_or_else(Expr::const_true);
        Op::new(self.iter, self.inputs, self.syms, pred, output.name, self.aux)
    }
}
