//! Dataflow operator variants and their lowering rules.
//!
//! Each operator consumes the already-lowered builders of its
//! predecessors and returns one combined builder. The variants are a
//! closed sum type dispatched through `Operator::lower`; capability
//! queries are pattern matches, not virtual calls.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rivulet_ir::{Expr, ExprError, Op, OpBuilder, StepFn, Symbol};
use rivulet_types::{DataType, Iter, Type};

use crate::error::GraphError;

/// User function applied by a map operator to each element.
pub type MapFn = Rc<dyn Fn(Expr) -> Result<Expr, ExprError>>;

/// User predicate applied by a where operator to each element.
pub type PredFn = Rc<dyn Fn(Expr) -> Result<Expr, ExprError>>;

/// User function combining the two sides of a join.
pub type JoinFn = Rc<dyn Fn(Expr, Expr) -> Result<Expr, ExprError>>;

/// Reduce accumulator: `(acc, win_start_ts, win_end_ts, elem) -> acc`.
pub type AccFn = Rc<dyn Fn(Expr, Expr, Expr, Expr) -> Result<Expr, ExprError>>;

/// Source operator state.
///
/// The input stream symbol and its whole-history window are created once
/// per source so every operator drawing from it shares the same symbols
/// in the lowered IR.
#[derive(Debug, Clone)]
pub struct SourceOp {
    pub name: String,
    pub batch_time: i64,
    pub input: Symbol,
    pub win_sym: Symbol,
    win: Expr,
}

impl SourceOp {
    pub fn new(name: impl Into<String>, dtype: DataType, batch_time: i64) -> Result<Self, ExprError> {
        let name = name.into();
        let input = Symbol::new(name.clone(), Type::stream(dtype));
        let win = Expr::window(input.expr(), -batch_time, 0)?;
        let win_sym = win.sym(format!("win_{}_{}", batch_time, name));
        Ok(Self { name, batch_time, input, win_sym, win })
    }
}

/// A logical dataflow operator.
pub enum Operator {
    Source(SourceOp),
    Map {
        name: String,
        f: MapFn,
    },
    Where {
        name: String,
        pred: PredFn,
    },
    /// Pure metadata: carries `(size, stride)` forward for the following
    /// reduce. Tumbling only, `size == stride`.
    Window {
        name: String,
        size: i64,
        stride: i64,
    },
    Reduce {
        name: String,
        init: Expr,
        step: AccFn,
        size: i64,
        stride: i64,
    },
    InnerJoin {
        name: String,
        join: JoinFn,
    },
    LeftOuterJoin {
        name: String,
        join: JoinFn,
        right_default: Expr,
    },
    FullOuterJoin {
        name: String,
        join: JoinFn,
        left_default: Expr,
        right_default: Expr,
    },
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Source(s) => write!(f, "Source({})", s.name),
            Operator::Map { name, .. } => write!(f, "Map({name})"),
            Operator::Where { name, .. } => write!(f, "Where({name})"),
            Operator::Window { name, size, stride } => {
                write!(f, "Window({name}, size={size}, stride={stride})")
            }
            Operator::Reduce { name, size, stride, .. } => {
                write!(f, "Reduce({name}, size={size}, stride={stride})")
            }
            Operator::InnerJoin { name, .. } => write!(f, "InnerJoin({name})"),
            Operator::LeftOuterJoin { name, .. } => write!(f, "LeftOuterJoin({name})"),
            Operator::FullOuterJoin { name, .. } => write!(f, "FullOuterJoin({name})"),
        }
    }
}

impl Operator {
    pub fn name(&self) -> &str {
        match self {
            Operator::Source(s) => &s.name,
            Operator::Map { name, .. }
            | Operator::Where { name, .. }
            | Operator::Window { name, .. }
            | Operator::Reduce { name, .. }
            | Operator::InnerJoin { name, .. }
            | Operator::LeftOuterJoin { name, .. }
            | Operator::FullOuterJoin { name, .. } => name,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Operator::Source(_))
    }

    pub fn is_window(&self) -> bool {
        matches!(self, Operator::Window { .. })
    }

    pub fn is_reduce(&self) -> bool {
        matches!(self, Operator::Reduce { .. })
    }

    /// `(size, stride)` of a window operator.
    pub fn window_params(&self) -> Option<(i64, i64)> {
        match self {
            Operator::Window { size, stride, .. } => Some((*size, *stride)),
            _ => None,
        }
    }

    /// Number of predecessor builders this operator consumes.
    pub fn arity(&self) -> usize {
        match self {
            Operator::Source(_) => 0,
            Operator::InnerJoin { .. }
            | Operator::LeftOuterJoin { .. }
            | Operator::FullOuterJoin { .. } => 2,
            _ => 1,
        }
    }

    /// Fold the predecessors' lowering results into one builder.
    pub fn lower(&self, builders: Vec<OpBuilder>) -> Result<OpBuilder, GraphError> {
        if builders.len() != self.arity() {
            return Err(GraphError::WrongArity {
                op: self.name().to_string(),
                expected: self.arity(),
                found: builders.len(),
            });
        }
        let mut builders = builders;
        match self {
            Operator::Source(src) => Ok(lower_source(src)),
            Operator::Map { name, f } => {
                let builder = builders.pop().expect("arity checked");
                lower_map(name, f, builder)
            }
            Operator::Where { name, pred } => {
                let builder = builders.pop().expect("arity checked");
                lower_where(name, pred, builder)
            }
            Operator::Window { .. } => Ok(builders.pop().expect("arity checked")),
            Operator::Reduce { name, init, step, size, stride } => {
                let builder = builders.pop().expect("arity checked");
                lower_reduce(name, init, step, *size, *stride, builder)
            }
            Operator::InnerJoin { name, join } => {
                let right = builders.pop().expect("arity checked");
                let left = builders.pop().expect("arity checked");
                lower_join(name, join, None, None, left, right)
            }
            Operator::LeftOuterJoin { name, join, right_default } => {
                let right = builders.pop().expect("arity checked");
                let left = builders.pop().expect("arity checked");
                lower_join(name, join, None, Some(right_default), left, right)
            }
            Operator::FullOuterJoin { name, join, left_default, right_default } => {
                let right = builders.pop().expect("arity checked");
                let left = builders.pop().expect("arity checked");
                lower_join(name, join, Some(left_default), Some(right_default), left, right)
            }
        }
    }
}

/// Source: a fresh builder over `[0, batch_time)` whose output is the
/// whole-history window of the raw input stream, under predicate `true`.
fn lower_source(src: &SourceOp) -> OpBuilder {
    let mut b = OpBuilder::new(Iter::new(0, src.batch_time));
    b.add_input(src.input.clone());
    b.bind(&src.win_sym, src.win.clone());
    b.pred = Some(Expr::const_true());
    b.output = Some(src.win_sym.clone());
    b
}

fn upstream_output(name: &str, b: &OpBuilder) -> Result<Symbol, GraphError> {
    b.output
        .clone()
        .ok_or_else(|| GraphError::UnboundOutput { op: name.to_string() })
}

/// Map: a nested per-element op binding `e = elem(out, 0)` and
/// `res = f(e)` under predicate `exists(e)`.
fn lower_map(name: &str, f: &MapFn, mut b: OpBuilder) -> Result<OpBuilder, GraphError> {
    let out = upstream_output(name, &b)?;

    let e = Expr::elem(out.expr(), 0)?;
    let e_sym = e.sym(format!("e_{}", out.name));
    let res = f(e_sym.expr())?;
    let res_sym = res.sym(format!("map_{}", e_sym.name));

    let mut syms = IndexMap::new();
    syms.insert(e_sym.name.clone(), e);
    syms.insert(res_sym.name.clone(), res);

    let op = Op::new(
        Iter::new(0, 1),
        vec![out],
        syms,
        Expr::exists(e_sym.expr()),
        res_sym.name.clone(),
        IndexMap::new(),
    )?;

    let loop_expr = Expr::loop_op(op);
    let loop_sym = loop_expr.sym(name);
    b.bind(&loop_sym, loop_expr);
    b.output = Some(loop_sym);
    Ok(b)
}

/// Where: same shape as map, but the output stays the element itself and
/// the predicate is `exists(e) AND p(e)` — filtering, never substitution.
fn lower_where(name: &str, pred: &PredFn, mut b: OpBuilder) -> Result<OpBuilder, GraphError> {
    let out = upstream_output(name, &b)?;

    let e = Expr::elem(out.expr(), 0)?;
    let e_sym = e.sym(format!("e_{}", out.name));
    let cond = Expr::and(Expr::exists(e_sym.expr()), pred(e_sym.expr())?)?;

    let mut syms = IndexMap::new();
    syms.insert(e_sym.name.clone(), e);

    let op = Op::new(
        Iter::new(0, 1),
        vec![out],
        syms,
        cond,
        e_sym.name.clone(),
        IndexMap::new(),
    )?;

    let loop_expr = Expr::loop_op(op);
    let loop_sym = loop_expr.sym(name);
    b.bind(&loop_sym, loop_expr);
    b.output = Some(loop_sym);
    Ok(b)
}

/// Reduce: a nested op over `[0, stride)` folding the tumbling window
/// `window(out, -size, 0)` from `init`, under predicate `true`. The
/// assembled query advances in batches of `size` from here on.
fn lower_reduce(
    name: &str,
    init: &Expr,
    step: &AccFn,
    size: i64,
    stride: i64,
    mut b: OpBuilder,
) -> Result<OpBuilder, GraphError> {
    let out = upstream_output(name, &b)?;

    let win = Expr::window(out.expr(), -size, 0)?;
    let win_sym = win.sym(format!("win_{}_{}_{}", size, stride, out.name));

    let acc = Symbol::new(format!("{name}_acc"), Type::value(init.ty.dtype.clone()));
    let t0 = Symbol::new(format!("{name}_t0"), Type::value(DataType::Int64));
    let t1 = Symbol::new(format!("{name}_t1"), Type::value(DataType::Int64));
    let elem = Symbol::new(format!("{name}_e"), Type::value(out.ty.dtype.clone()));
    let body = step(acc.expr(), t0.expr(), t1.expr(), elem.expr())?;

    let red = Expr::reduce(
        win_sym.expr(),
        init.clone(),
        StepFn { acc, win_start: t0, win_end: t1, elem, body },
    )?;
    let red_sym = red.sym(format!("red_{}", win_sym.name));

    let mut syms = IndexMap::new();
    syms.insert(win_sym.name.clone(), win);
    syms.insert(red_sym.name.clone(), red);

    let op = Op::new(
        Iter::new(0, stride),
        vec![out],
        syms,
        Expr::const_true(),
        red_sym.name.clone(),
        IndexMap::new(),
    )?;

    let loop_expr = Expr::loop_op(op);
    let loop_sym = loop_expr.sym(name);
    b.bind(&loop_sym, loop_expr);
    b.output = Some(loop_sym);
    Ok(b)
}

/// Joins: the right builder is folded into the left without symbol or
/// input duplication, then a nested per-step op reads both sides at
/// offset 0, with the variant deciding the predicate and default
/// substitution. Merging first keeps the combined symbol table in
/// dependency order: the join op lands after the right-side symbols it
/// references.
fn lower_join(
    name: &str,
    join: &JoinFn,
    left_default: Option<&Expr>,
    right_default: Option<&Expr>,
    mut left: OpBuilder,
    right: OpBuilder,
) -> Result<OpBuilder, GraphError> {
    let lout = upstream_output(name, &left)?;
    let rout = upstream_output(name, &right)?;
    left.merge(right)?;

    let e_left = Expr::elem(lout.expr(), 0)?;
    let e_left_sym = e_left.sym(format!("e_left_{}", lout.name));
    let e_right = Expr::elem(rout.expr(), 0)?;
    let e_right_sym = e_right.sym(format!("e_right_{}", rout.name));

    let mut syms = IndexMap::new();
    syms.insert(e_left_sym.name.clone(), e_left);
    syms.insert(e_right_sym.name.clone(), e_right);

    // Outer variants substitute a default for the missing side; the side
    // actually fed to the join function.
    let left_val_sym = match left_default {
        Some(default) => {
            let val = Expr::ifelse(
                Expr::exists(e_left_sym.expr()),
                e_left_sym.expr(),
                default.clone(),
            )?;
            let val_sym = val.sym(format!("e_left_{}_val", lout.name));
            syms.insert(val_sym.name.clone(), val);
            val_sym
        }
        None => e_left_sym.clone(),
    };
    let right_val_sym = match right_default {
        Some(default) => {
            let val = Expr::ifelse(
                Expr::exists(e_right_sym.expr()),
                e_right_sym.expr(),
                default.clone(),
            )?;
            let val_sym = val.sym(format!("e_right_{}_val", rout.name));
            syms.insert(val_sym.name.clone(), val);
            val_sym
        }
        None => e_right_sym.clone(),
    };

    let pred = match (left_default, right_default) {
        // Inner: both sides present.
        (None, None) => Expr::and(
            Expr::exists(e_left_sym.expr()),
            Expr::exists(e_right_sym.expr()),
        )?,
        // Left outer: left side present.
        (None, Some(_)) => Expr::exists(e_left_sym.expr()),
        // Full outer: either side present.
        (Some(_), Some(_)) => Expr::or(
            Expr::exists(e_left_sym.expr()),
            Expr::exists(e_right_sym.expr()),
        )?,
        // A left default without a right default has no variant.
        (Some(_), None) => unreachable!("no such join variant"),
    };

    let res = join(left_val_sym.expr(), right_val_sym.expr())?;
    let res_sym = res.sym(format!("join_res_{name}"));
    syms.insert(res_sym.name.clone(), res);

    let op = Op::new(
        Iter::new(0, 1),
        vec![lout, rout],
        syms,
        pred,
        res_sym.name.clone(),
        IndexMap::new(),
    )?;

    let loop_expr = Expr::loop_op(op);
    let loop_sym = loop_expr.sym(name);
    left.bind(&loop_sym, loop_expr);
    left.output = Some(loop_sym);
    Ok(left)
}
