//! Tree-walking evaluation of lowered loop operators.
//!
//! Evaluation is two-layered, mirroring the shape lowering produces. The
//! top-level operator's symbol table is walked once in stream context:
//! window bindings become clipped views of their backing stream and loop
//! bindings are stepped over the execution horizon. A stepped operator
//! evaluates its table once per step in value context, where element
//! lookups, predicates and folds apply.
//!
//! Absence is first-class: an element lookup that finds no covering data
//! slot yields no value, and strict operators propagate that. `And`/`Or`
//! use three-valued logic so predicates built over possibly-absent
//! elements stay decidable, and `IfElse` evaluates only the taken branch.

use std::collections::HashMap;
use std::rc::Rc;

use rivulet_ir::{ConstVal, Expr, ExprKind, MathOp, Op, StepFn};

use crate::engine::EngineError;
use crate::region::Region;
use crate::value::Value;

/// One present element of an evaluated stream, covering `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Event {
    pub start: i64,
    pub end: i64,
    pub value: Value,
}

type Stream = Rc<Vec<Event>>;

#[derive(Debug, Clone)]
enum Binding {
    /// A value context result; `None` is the absent value.
    Value(Option<Value>),
    Stream(Stream),
}

type Scope = HashMap<String, Binding>;

fn const_value(c: &ConstVal) -> Value {
    match c {
        ConstVal::Bool(b) => Value::Bool(*b),
        ConstVal::Int(i) => Value::Int(*i),
        ConstVal::UInt(u) => Value::UInt(*u),
        ConstVal::Float(f) => Value::Float(*f),
    }
}

/// Present data slots of a region as an event stream.
fn region_stream(region: &Region) -> Stream {
    let events = region
        .slots()
        .iter()
        .filter(|s| !s.gap)
        .filter_map(|s| {
            s.payload.as_ref().map(|v| Event {
                start: s.start,
                end: s.end,
                value: v.clone(),
            })
        })
        .collect();
    Rc::new(events)
}

/// The element covering time `t`: the event with `start < t <= end`.
fn lookup(stream: &[Event], t: i64) -> Option<&Event> {
    let idx = stream.partition_point(|ev| ev.end < t);
    stream.get(idx).filter(|ev| ev.start < t && t <= ev.end)
}

/// Events fully contained in the closed range `[lo, hi]`.
fn clip(stream: &[Event], lo: i64, hi: i64) -> Stream {
    let events = stream
        .iter()
        .filter(|ev| ev.start >= lo && ev.end <= hi)
        .cloned()
        .collect();
    Rc::new(events)
}

fn resolve<'a>(scope: &'a Scope, name: &str) -> Result<&'a Binding, EngineError> {
    scope
        .get(name)
        .ok_or_else(|| EngineError::UnknownSymbol(name.to_string()))
}

fn expect_stream(binding: &Binding, what: &str) -> Result<Stream, EngineError> {
    match binding {
        Binding::Stream(s) => Ok(Rc::clone(s)),
        Binding::Value(_) => Err(EngineError::Type(format!("{what} is not a stream"))),
    }
}

fn expect_value(binding: &Binding, what: &str) -> Result<Option<Value>, EngineError> {
    match binding {
        Binding::Value(v) => Ok(v.clone()),
        Binding::Stream(_) => Err(EngineError::Type(format!("{what} is not a value"))),
    }
}

/// Run the top-level operator over `[t_start, t_end)`, writing emitted
/// elements into `out`.
pub(crate) fn run(
    op: &Op,
    t_start: i64,
    t_end: i64,
    out: &mut Region,
    ins: &[&Region],
) -> Result<(), EngineError> {
    if ins.len() != op.inputs.len() {
        return Err(EngineError::InputArity {
            expected: op.inputs.len(),
            found: ins.len(),
        });
    }

    let mut scope = Scope::new();
    for (sym, region) in op.inputs.iter().zip(ins) {
        if region.schema() != &sym.ty.dtype {
            return Err(EngineError::InputSchema {
                input: sym.name.clone(),
            });
        }
        scope.insert(sym.name.clone(), Binding::Stream(region_stream(region)));
    }

    for (name, expr) in &op.syms {
        let binding = eval_stream_ctx(expr, &scope, t_start, t_end)?;
        scope.insert(name.clone(), binding);
    }

    match eval_value_ctx(&op.pred, &scope, t_start, t_end)? {
        Some(Value::Bool(true)) => {}
        Some(Value::Bool(false)) | None => return Ok(()),
        Some(_) => return Err(EngineError::Type("predicate is not boolean".to_string())),
    }

    let result = expect_stream(resolve(&scope, &op.output)?, &op.output)?;
    for ev in result.iter() {
        if ev.start > out.last_time() {
            out.commit_null(ev.start)?;
        }
        out.commit_data(ev.end)?;
        out.write_data(ev.value.clone(), ev.end, out.end_idx())?;
    }
    Ok(())
}

/// Evaluate one top-level symbol table entry over the execution horizon.
fn eval_stream_ctx(expr: &Expr, scope: &Scope, t0: i64, t1: i64) -> Result<Binding, EngineError> {
    match &expr.kind {
        ExprKind::SymbolRef(name) => Ok(resolve(scope, name)?.clone()),
        ExprKind::Window { stream, lo, hi } => {
            let base = eval_stream_ctx(stream, scope, t0, t1)?;
            let base = expect_stream(&base, "window operand")?;
            Ok(Binding::Stream(clip(&base, t1 + lo, t1 + hi)))
        }
        ExprKind::Loop(op) => Ok(Binding::Stream(step_op(op, scope, t0, t1)?)),
        _ => Ok(Binding::Value(eval_value_ctx(expr, scope, t0, t1)?)),
    }
}

/// Step a nested operator over `[t0, t1)`, collecting its emissions.
///
/// An operator over a unit interval is stepped at the union of its input
/// element boundaries; a wider interval means strided stepping, one step
/// per multiple of the interval length.
fn step_op(op: &Op, outer: &Scope, t0: i64, t1: i64) -> Result<Stream, EngineError> {
    let mut scope = Scope::new();
    for sym in &op.inputs {
        let binding = resolve(outer, &sym.name)?;
        scope.insert(sym.name.clone(), binding.clone());
    }

    let period = op.iter.len().unwrap_or(1);
    let spans = if period <= 1 {
        boundary_spans(op, &scope, t0, t1)?
    } else {
        strided_spans(period, t0, t1)
    };

    let mut emitted = Vec::new();
    for (a, b) in spans {
        let mut step_scope = scope.clone();
        for (name, expr) in &op.syms {
            let binding = match &expr.kind {
                ExprKind::Window { stream, lo, hi } => {
                    let base = eval_value_ctx_stream(stream, &step_scope, a, b)?;
                    Binding::Stream(clip(&base, b + lo, b + hi))
                }
                ExprKind::Loop(nested) => Binding::Stream(step_op(nested, &step_scope, a, b)?),
                _ => Binding::Value(eval_value_ctx(expr, &step_scope, a, b)?),
            };
            step_scope.insert(name.clone(), binding);
        }

        match eval_value_ctx(&op.pred, &step_scope, a, b)? {
            Some(Value::Bool(true)) => {}
            Some(Value::Bool(false)) | None => continue,
            Some(_) => return Err(EngineError::Type("predicate is not boolean".to_string())),
        }

        if let Some(value) = expect_value(resolve(&step_scope, &op.output)?, &op.output)? {
            emitted.push(Event { start: a, end: b, value });
        }
    }
    Ok(Rc::new(emitted))
}

/// Spans between consecutive element boundaries of the operator's inputs,
/// clamped to `[t0, t1]`.
fn boundary_spans(op: &Op, scope: &Scope, t0: i64, t1: i64) -> Result<Vec<(i64, i64)>, EngineError> {
    let mut points = vec![t0, t1];
    for sym in &op.inputs {
        let stream = expect_stream(resolve(scope, &sym.name)?, &sym.name)?;
        for ev in stream.iter() {
            if ev.start > t0 && ev.start < t1 {
                points.push(ev.start);
            }
            if ev.end > t0 && ev.end < t1 {
                points.push(ev.end);
            }
        }
    }
    points.sort_unstable();
    points.dedup();
    Ok(points.windows(2).map(|w| (w[0], w[1])).collect())
}

fn strided_spans(period: i64, t0: i64, t1: i64) -> Vec<(i64, i64)> {
    let mut spans = Vec::new();
    let mut t = t0 + period;
    while t <= t1 {
        spans.push((t - period, t));
        t += period;
    }
    spans
}

fn eval_value_ctx_stream(
    expr: &Expr,
    scope: &Scope,
    a: i64,
    b: i64,
) -> Result<Stream, EngineError> {
    match &expr.kind {
        ExprKind::SymbolRef(name) => expect_stream(resolve(scope, name)?, name),
        ExprKind::Loop(op) => step_op(op, scope, a, b),
        _ => Err(EngineError::Type("expected a stream expression".to_string())),
    }
}

/// Evaluate a value expression at the step `[a, b)`; the current time for
/// element lookups is `b`.
fn eval_value_ctx(expr: &Expr, scope: &Scope, a: i64, b: i64) -> Result<Option<Value>, EngineError> {
    match &expr.kind {
        ExprKind::Const(c) => Ok(Some(const_value(c))),
        ExprKind::SymbolRef(name) => expect_value(resolve(scope, name)?, name),
        ExprKind::Elem { stream, offset } => {
            let base = eval_value_ctx_stream(stream, scope, a, b)?;
            Ok(lookup(&base, b + offset).map(|ev| ev.value.clone()))
        }
        ExprKind::Exists(inner) => {
            let present = eval_value_ctx(inner, scope, a, b)?.is_some();
            Ok(Some(Value::Bool(present)))
        }
        ExprKind::Window { stream, lo, hi } => {
            // A window used directly in value position folds via Reduce;
            // bare windows have no value meaning.
            let _ = (stream, lo, hi);
            Err(EngineError::Type("window has no value meaning".to_string()))
        }
        ExprKind::Reduce { win, init, step } => {
            let win = eval_value_ctx_stream(win, scope, a, b)?;
            let init = eval_value_ctx(init, scope, a, b)?
                .ok_or_else(|| EngineError::Type("reduce init is absent".to_string()))?;
            fold(&win, init, step, scope, a, b).map(Some)
        }
        ExprKind::Unary(op, operand) => {
            let v = eval_value_ctx(operand, scope, a, b)?;
            match v {
                Some(v) => apply_unary(*op, v).map(Some),
                None => Ok(None),
            }
        }
        ExprKind::Binary(op, left, right) => {
            let l = eval_value_ctx(left, scope, a, b)?;
            let r = eval_value_ctx(right, scope, a, b)?;
            apply_binary(*op, l, r)
        }
        ExprKind::New(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for f in fields {
                match eval_value_ctx(f, scope, a, b)? {
                    Some(v) => values.push(v),
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::Struct(values)))
        }
        ExprKind::Get(input, n) => match eval_value_ctx(input, scope, a, b)? {
            Some(Value::Struct(fields)) => fields
                .get(*n)
                .cloned()
                .map(Some)
                .ok_or_else(|| EngineError::Type(format!("struct has no field {n}"))),
            Some(_) => Err(EngineError::Type("projection of a non-struct".to_string())),
            None => Ok(None),
        },
        ExprKind::IfElse { cond, then, other } => match eval_value_ctx(cond, scope, a, b)? {
            Some(Value::Bool(true)) => eval_value_ctx(then, scope, a, b),
            Some(Value::Bool(false)) => eval_value_ctx(other, scope, a, b),
            Some(_) => Err(EngineError::Type("condition is not boolean".to_string())),
            None => Ok(None),
        },
        ExprKind::Loop(_) => Err(EngineError::Type(
            "loop operator has no value meaning".to_string(),
        )),
    }
}

/// Left fold of a window's elements in time order.
fn fold(
    win: &[Event],
    init: Value,
    step: &StepFn,
    scope: &Scope,
    a: i64,
    b: i64,
) -> Result<Value, EngineError> {
    let mut acc = init;
    for ev in win {
        let mut step_scope = scope.clone();
        step_scope.insert(step.acc.name.clone(), Binding::Value(Some(acc)));
        step_scope.insert(
            step.win_start.name.clone(),
            Binding::Value(Some(Value::Int(a))),
        );
        step_scope.insert(
            step.win_end.name.clone(),
            Binding::Value(Some(Value::Int(b))),
        );
        step_scope.insert(
            step.elem.name.clone(),
            Binding::Value(Some(ev.value.clone())),
        );
        acc = eval_value_ctx(&step.body, &step_scope, a, b)?
            .ok_or_else(|| EngineError::Type("reduce step produced no value".to_string()))?;
    }
    Ok(acc)
}

fn apply_unary(op: MathOp, v: Value) -> Result<Value, EngineError> {
    match (op, v) {
        (MathOp::Neg, Value::Int(a)) => Ok(Value::Int(-a)),
        (MathOp::Neg, Value::Float(a)) => Ok(Value::Float(-a)),
        (MathOp::Abs, Value::Int(a)) => Ok(Value::Int(a.abs())),
        (MathOp::Abs, Value::Float(a)) => Ok(Value::Float(a.abs())),
        (MathOp::Not, Value::Bool(a)) => Ok(Value::Bool(!a)),
        (MathOp::Sqrt, Value::Float(a)) => Ok(Value::Float(a.sqrt())),
        (MathOp::Ceil, Value::Float(a)) => Ok(Value::Float(a.ceil())),
        (MathOp::Floor, Value::Float(a)) => Ok(Value::Float(a.floor())),
        (op, v) => Err(EngineError::Type(format!("cannot apply {op:?} to {v:?}"))),
    }
}

/// Apply a binary operator under three-valued logic: `And`/`Or` decide
/// from one present operand when they can, every other operator is strict
/// in both operands.
fn apply_binary(
    op: MathOp,
    l: Option<Value>,
    r: Option<Value>,
) -> Result<Option<Value>, EngineError> {
    if matches!(op, MathOp::And | MathOp::Or) {
        return kleene(op, l, r);
    }
    match (l, r) {
        (Some(l), Some(r)) => apply_binary_strict(op, l, r).map(Some),
        _ => Ok(None),
    }
}

fn kleene(op: MathOp, l: Option<Value>, r: Option<Value>) -> Result<Option<Value>, EngineError> {
    let as_bool = |v: &Option<Value>| -> Result<Option<bool>, EngineError> {
        match v {
            Some(Value::Bool(b)) => Ok(Some(*b)),
            None => Ok(None),
            Some(other) => Err(EngineError::Type(format!("{other:?} is not boolean"))),
        }
    };
    let l = as_bool(&l)?;
    let r = as_bool(&r)?;
    let out = match op {
        MathOp::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        MathOp::Or => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!("kleene only handles And/Or"),
    };
    Ok(out.map(Value::Bool))
}

fn apply_binary_strict(op: MathOp, l: Value, r: Value) -> Result<Value, EngineError> {
    use MathOp::*;
    use Value::*;
    match (l, r) {
        (Int(a), Int(b)) => match op {
            Add => a.checked_add(b).map(Int).ok_or(EngineError::Overflow),
            Sub => a.checked_sub(b).map(Int).ok_or(EngineError::Overflow),
            Mul => a.checked_mul(b).map(Int).ok_or(EngineError::Overflow),
            Div => {
                if b == 0 {
                    Err(EngineError::DivideByZero)
                } else {
                    Ok(Int(a / b))
                }
            }
            Max => Ok(Int(a.max(b))),
            Min => Ok(Int(a.min(b))),
            Lt => Ok(Bool(a < b)),
            Lte => Ok(Bool(a <= b)),
            Gt => Ok(Bool(a > b)),
            Gte => Ok(Bool(a >= b)),
            Eq => Ok(Bool(a == b)),
            other => Err(EngineError::Type(format!("{other:?} on signed integers"))),
        },
        (UInt(a), UInt(b)) => match op {
            Add => a.checked_add(b).map(UInt).ok_or(EngineError::Overflow),
            Sub => a.checked_sub(b).map(UInt).ok_or(EngineError::Overflow),
            Mul => a.checked_mul(b).map(UInt).ok_or(EngineError::Overflow),
            Div => {
                if b == 0 {
                    Err(EngineError::DivideByZero)
                } else {
                    Ok(UInt(a / b))
                }
            }
            Max => Ok(UInt(a.max(b))),
            Min => Ok(UInt(a.min(b))),
            Lt => Ok(Bool(a < b)),
            Lte => Ok(Bool(a <= b)),
            Gt => Ok(Bool(a > b)),
            Gte => Ok(Bool(a >= b)),
            Eq => Ok(Bool(a == b)),
            other => Err(EngineError::Type(format!("{other:?} on unsigned integers"))),
        },
        (Float(a), Float(b)) => match op {
            Add => Ok(Float(a + b)),
            Sub => Ok(Float(a - b)),
            Mul => Ok(Float(a * b)),
            Div => Ok(Float(a / b)),
            Pow => Ok(Float(a.powf(b))),
            Max => Ok(Float(a.max(b))),
            Min => Ok(Float(a.min(b))),
            Lt => Ok(Bool(a < b)),
            Lte => Ok(Bool(a <= b)),
            Gt => Ok(Bool(a > b)),
            Gte => Ok(Bool(a >= b)),
            Eq => Ok(Bool(a == b)),
            other => Err(EngineError::Type(format!("{other:?} on floats"))),
        },
        (Bool(a), Bool(b)) if op == Eq => Ok(Bool(a == b)),
        (l, r) => Err(EngineError::Type(format!(
            "cannot apply {op:?} to {l:?} and {r:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(start: i64, end: i64, v: i64) -> Event {
        Event { start, end, value: Value::Int(v) }
    }

    #[test]
    fn test_lookup_is_half_open() {
        let stream = vec![ev(0, 5, 1), ev(5, 10, 2)];
        assert_eq!(lookup(&stream, 5).map(|e| &e.value), Some(&Value::Int(1)));
        assert_eq!(lookup(&stream, 6).map(|e| &e.value), Some(&Value::Int(2)));
        assert_eq!(lookup(&stream, 0), None);
        assert_eq!(lookup(&stream, 11), None);
    }

    #[test]
    fn test_lookup_skips_missing_spans() {
        // Element covering (5, 10]; nothing covers (0, 5].
        let stream = vec![ev(5, 10, 2)];
        assert_eq!(lookup(&stream, 3), None);
        assert_eq!(lookup(&stream, 10).map(|e| &e.value), Some(&Value::Int(2)));
    }

    #[test]
    fn test_clip_keeps_contained_events_only() {
        let stream = vec![ev(0, 5, 1), ev(5, 10, 2), ev(10, 15, 3)];
        let clipped = clip(&stream, 5, 15);
        assert_eq!(clipped.len(), 2);
        assert_eq!(clipped[0].value, Value::Int(2));
    }

    #[test]
    fn test_strided_spans_tile_the_horizon() {
        assert_eq!(strided_spans(10, 0, 30), vec![(0, 10), (10, 20), (20, 30)]);
        // A trailing partial period is not stepped.
        assert_eq!(strided_spans(10, 0, 25), vec![(0, 10), (10, 20)]);
    }

    #[test]
    fn test_kleene_and_or() {
        let t = || Some(Value::Bool(true));
        let f = || Some(Value::Bool(false));
        assert_eq!(kleene(MathOp::And, f(), None).unwrap(), f());
        assert_eq!(kleene(MathOp::And, t(), None).unwrap(), None);
        assert_eq!(kleene(MathOp::Or, None, t()).unwrap(), t());
        assert_eq!(kleene(MathOp::Or, None, f()).unwrap(), None);
    }

    #[test]
    fn test_division_by_zero() {
        let err = apply_binary_strict(MathOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert!(matches!(err, EngineError::DivideByZero));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let err = apply_binary_strict(MathOp::Add, Value::Int(i64::MAX), Value::Int(1)).unwrap_err();
        assert!(matches!(err, EngineError::Overflow));
        let err = apply_binary_strict(MathOp::Mul, Value::UInt(u64::MAX), Value::UInt(2)).unwrap_err();
        assert!(matches!(err, EngineError::Overflow));
        // Unsigned subtraction below zero does not saturate.
        let err = apply_binary_strict(MathOp::Sub, Value::UInt(1), Value::UInt(2)).unwrap_err();
        assert!(matches!(err, EngineError::Overflow));
    }
}
