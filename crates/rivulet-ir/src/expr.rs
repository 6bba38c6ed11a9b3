//! Typed IR expressions.
//!
//! Every expression carries an explicit declared result type supplied at
//! construction time; constructors validate and mismatches are an error
//! here, never inferred away later.

use rivulet_types::{DataType, Type};
use thiserror::Error;

use crate::op::Op;

/// An expression construction error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("operand type mismatch for {op:?}: {left:?} vs {right:?}")]
    OperandMismatch {
        op: MathOp,
        left: DataType,
        right: DataType,
    },

    #[error("declared type {declared:?} does not match operand type {found:?}")]
    DeclaredMismatch { declared: DataType, found: DataType },

    #[error("constant value does not fit declared type {0:?}")]
    ConstMismatch(DataType),

    #[error("expected a boolean, found {0:?}")]
    NotBool(DataType),

    #[error("expected a stream-typed operand")]
    NotAStream,

    #[error("expected a value-typed operand")]
    NotAValue,

    #[error("expected a struct, found {0:?}")]
    NotAStruct(DataType),

    #[error("struct field index {index} out of bounds (arity {arity})")]
    FieldOutOfBounds { index: usize, arity: usize },

    #[error("element offset must be non-positive, found {0}")]
    InvalidOffset(i64),

    #[error("invalid window range [{lo}, {hi}]")]
    InvalidWindow { lo: i64, hi: i64 },

    #[error("struct construction requires at least one field")]
    EmptyStruct,

    #[error("branch types differ: {then:?} vs {other:?}")]
    BranchMismatch { then: DataType, other: DataType },

    #[error("accumulator type {acc:?} does not match init type {init:?}")]
    AccMismatch { acc: DataType, init: DataType },
}

/// Arithmetic, comparison and boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
    Sqrt,
    Abs,
    Neg,
    Ceil,
    Floor,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Not,
    And,
    Or,
}

impl MathOp {
    /// Operators whose result is boolean.
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            MathOp::Lt
                | MathOp::Lte
                | MathOp::Gt
                | MathOp::Gte
                | MathOp::Eq
                | MathOp::Not
                | MathOp::And
                | MathOp::Or
        )
    }

    /// Operators requiring boolean operands.
    pub fn is_logical(&self) -> bool {
        matches!(self, MathOp::Not | MathOp::And | MathOp::Or)
    }
}

/// A constant payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstVal {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl ConstVal {
    fn fits(&self, dtype: &DataType) -> bool {
        match self {
            ConstVal::Bool(_) => dtype.is_bool(),
            ConstVal::Int(_) => dtype.is_int() && dtype.is_signed(),
            ConstVal::UInt(_) => dtype.is_int() && !dtype.is_signed(),
            ConstVal::Float(_) => dtype.is_float(),
        }
    }
}

/// A named, typed symbol.
///
/// Symbol identity for table and merge purposes is the name string alone;
/// globally unique names across one query graph are a precondition the
/// graph layer upholds by numbering its operators.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
}

impl Symbol {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty }
    }

    /// A reference expression to this symbol.
    pub fn expr(&self) -> Expr {
        Expr {
            ty: self.ty.clone(),
            kind: ExprKind::SymbolRef(self.name.clone()),
        }
    }
}

/// The materialized accumulator of a `Reduce`.
///
/// The step body is stored applied to its four parameter symbols
/// (accumulator, window start time, window end time, element) so the IR
/// stays pure data.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFn {
    pub acc: Symbol,
    pub win_start: Symbol,
    pub win_end: Symbol,
    pub elem: Symbol,
    pub body: Expr,
}

/// A typed IR expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub ty: Type,
    pub kind: ExprKind,
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(ConstVal),
    SymbolRef(String),
    Unary(MathOp, Box<Expr>),
    Binary(MathOp, Box<Expr>, Box<Expr>),
    /// Element of a stream at a relative offset; 0 is "now", negative is
    /// look-back.
    Elem { stream: Box<Expr>, offset: i64 },
    /// True iff the referenced position holds a present (non-gap) value.
    Exists(Box<Expr>),
    /// Bounded sub-view over the closed relative range `[lo, hi]`.
    Window { stream: Box<Expr>, lo: i64, hi: i64 },
    /// Left fold over a window's elements in ascending time order.
    Reduce {
        win: Box<Expr>,
        init: Box<Expr>,
        step: Box<StepFn>,
    },
    /// Struct construction by position.
    New(Vec<Expr>),
    /// Positional struct projection.
    Get(Box<Expr>, usize),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        other: Box<Expr>,
    },
    /// A nested loop operator bound as the expression of a symbol.
    Loop(Box<Op>),
}

impl Expr {
    /// A typed constant.
    pub fn constant(dtype: DataType, val: ConstVal) -> Result<Expr, ExprError> {
        if !val.fits(&dtype) {
            return Err(ExprError::ConstMismatch(dtype));
        }
        Ok(Expr {
            ty: Type::value(dtype),
            kind: ExprKind::Const(val),
        })
    }

    /// The constant `true`.
    pub fn const_true() -> Expr {
        Expr {
            ty: Type::value(DataType::Bool),
            kind: ExprKind::Const(ConstVal::Bool(true)),
        }
    }

    /// A unary operator application with a declared result type.
    pub fn unary(dtype: DataType, op: MathOp, operand: Expr) -> Result<Expr, ExprError> {
        if !operand.ty.is_value() {
            return Err(ExprError::NotAValue);
        }
        if op.is_logical() && !operand.ty.dtype.is_bool() {
            return Err(ExprError::NotBool(operand.ty.dtype.clone()));
        }
        if op.is_predicate() {
            if !dtype.is_bool() {
                return Err(ExprError::NotBool(dtype));
            }
        } else if dtype != operand.ty.dtype {
            return Err(ExprError::DeclaredMismatch {
                declared: dtype,
                found: operand.ty.dtype.clone(),
            });
        }
        Ok(Expr {
            ty: Type::value(dtype),
            kind: ExprKind::Unary(op, Box::new(operand)),
        })
    }

    /// A binary operator application with a declared result type.
    ///
    /// Operand types must match exactly; there is no implicit widening.
    pub fn binary(dtype: DataType, op: MathOp, left: Expr, right: Expr) -> Result<Expr, ExprError> {
        if !left.ty.is_value() || !right.ty.is_value() {
            return Err(ExprError::NotAValue);
        }
        if left.ty.dtype != right.ty.dtype {
            return Err(ExprError::OperandMismatch {
                op,
                left: left.ty.dtype.clone(),
                right: right.ty.dtype.clone(),
            });
        }
        if op.is_logical() && !left.ty.dtype.is_bool() {
            return Err(ExprError::NotBool(left.ty.dtype.clone()));
        }
        if op.is_predicate() {
            if !dtype.is_bool() {
                return Err(ExprError::NotBool(dtype));
            }
        } else if dtype != left.ty.dtype {
            return Err(ExprError::DeclaredMismatch {
                declared: dtype,
                found: left.ty.dtype.clone(),
            });
        }
        Ok(Expr {
            ty: Type::value(dtype),
            kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
        })
    }

    /// Boolean conjunction.
    pub fn and(left: Expr, right: Expr) -> Result<Expr, ExprError> {
        Expr::binary(DataType::Bool, MathOp::And, left, right)
    }

    /// Boolean disjunction.
    pub fn or(left: Expr, right: Expr) -> Result<Expr, ExprError> {
        Expr::binary(DataType::Bool, MathOp::Or, left, right)
    }

    /// Element of `stream` at a relative offset.
    pub fn elem(stream: Expr, offset: i64) -> Result<Expr, ExprError> {
        if !stream.ty.is_stream() {
            return Err(ExprError::NotAStream);
        }
        if offset > 0 {
            return Err(ExprError::InvalidOffset(offset));
        }
        let ty = Type::value(stream.ty.dtype.clone());
        Ok(Expr {
            ty,
            kind: ExprKind::Elem { stream: Box::new(stream), offset },
        })
    }

    /// Existence test for the referenced position.
    pub fn exists(e: Expr) -> Expr {
        Expr {
            ty: Type::value(DataType::Bool),
            kind: ExprKind::Exists(Box::new(e)),
        }
    }

    /// Bounded sub-view of `stream` spanning relative offsets `[lo, hi]`.
    pub fn window(stream: Expr, lo: i64, hi: i64) -> Result<Expr, ExprError> {
        if !stream.ty.is_stream() {
            return Err(ExprError::NotAStream);
        }
        if lo > hi {
            return Err(ExprError::InvalidWindow { lo, hi });
        }
        let ty = stream.ty.clone();
        Ok(Expr {
            ty,
            kind: ExprKind::Window { stream: Box::new(stream), lo, hi },
        })
    }

    /// Left fold of a window from `init` by the step function.
    pub fn reduce(win: Expr, init: Expr, step: StepFn) -> Result<Expr, ExprError> {
        if !win.ty.is_stream() {
            return Err(ExprError::NotAStream);
        }
        if !init.ty.is_value() {
            return Err(ExprError::NotAValue);
        }
        if step.acc.ty.dtype != init.ty.dtype {
            return Err(ExprError::AccMismatch {
                acc: step.acc.ty.dtype.clone(),
                init: init.ty.dtype.clone(),
            });
        }
        if step.body.ty.dtype != init.ty.dtype {
            return Err(ExprError::DeclaredMismatch {
                declared: init.ty.dtype.clone(),
                found: step.body.ty.dtype.clone(),
            });
        }
        if step.elem.ty.dtype != win.ty.dtype {
            return Err(ExprError::DeclaredMismatch {
                declared: win.ty.dtype.clone(),
                found: step.elem.ty.dtype.clone(),
            });
        }
        let ty = Type::value(init.ty.dtype.clone());
        Ok(Expr {
            ty,
            kind: ExprKind::Reduce {
                win: Box::new(win),
                init: Box::new(init),
                step: Box::new(step),
            },
        })
    }

    /// Struct construction from ordered field expressions.
    pub fn new_struct(fields: Vec<Expr>) -> Result<Expr, ExprError> {
        if fields.is_empty() {
            return Err(ExprError::EmptyStruct);
        }
        let mut dtypes = Vec::with_capacity(fields.len());
        for f in &fields {
            if !f.ty.is_value() {
                return Err(ExprError::NotAValue);
            }
            dtypes.push(f.ty.dtype.clone());
        }
        Ok(Expr {
            ty: Type::value(DataType::Struct(dtypes)),
            kind: ExprKind::New(fields),
        })
    }

    /// Positional projection out of a struct value.
    pub fn get(input: Expr, n: usize) -> Result<Expr, ExprError> {
        if !input.ty.dtype.is_struct() {
            return Err(ExprError::NotAStruct(input.ty.dtype.clone()));
        }
        let field = input
            .ty
            .dtype
            .field(n)
            .ok_or(ExprError::FieldOutOfBounds {
                index: n,
                arity: input.ty.dtype.arity(),
            })?
            .clone();
        Ok(Expr {
            ty: Type::value(field),
            kind: ExprKind::Get(Box::new(input), n),
        })
    }

    /// Conditional expression; both branches must agree on type.
    pub fn ifelse(cond: Expr, then: Expr, other: Expr) -> Result<Expr, ExprError> {
        if !cond.ty.dtype.is_bool() {
            return Err(ExprError::NotBool(cond.ty.dtype.clone()));
        }
        if then.ty.dtype != other.ty.dtype {
            return Err(ExprError::BranchMismatch {
                then: then.ty.dtype.clone(),
                other: other.ty.dtype.clone(),
            });
        }
        let ty = then.ty.clone();
        Ok(Expr {
            ty,
            kind: ExprKind::IfElse {
                cond: Box::new(cond),
                then: Box::new(then),
                other: Box::new(other),
            },
        })
    }

    /// A nested loop operator as an expression.
    pub fn loop_op(op: Op) -> Expr {
        let ty = op.ty();
        Expr {
            ty,
            kind: ExprKind::Loop(Box::new(op)),
        }
    }

    /// A fresh symbol of this expression's type.
    pub fn sym(&self, name: impl Into<String>) -> Symbol {
        Symbol::new(name, self.ty.clone())
    }
}
