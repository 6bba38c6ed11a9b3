//! Plain-text rendering of the Loop IR.
//!
//! Used by the compile-time debug log and by humans staring at lowered
//! queries. The output is not meant to be parsed back.

use std::fmt::{self, Write};

use crate::expr::{ConstVal, Expr, ExprKind, MathOp};
use crate::op::Op;

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_op(&mut out, self, 0)?;
        f.write_str(&out)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_expr(&mut out, self, 0)?;
        f.write_str(&out)
    }
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn write_op(out: &mut String, op: &Op, level: usize) -> fmt::Result {
    let end = if op.iter.is_unbounded() {
        "inf".to_string()
    } else {
        op.iter.end.to_string()
    };
    write!(out, "op [{}, {}) (", op.iter.start, end)?;
    for (i, input) in op.inputs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&input.name);
    }
    out.push_str(") {\n");
    for (name, expr) in &op.syms {
        indent(out, level + 1);
        write!(out, "{} = ", name)?;
        write_expr(out, expr, level + 1)?;
        out.push('\n');
    }
    for (name, expr) in &op.aux {
        indent(out, level + 1);
        write!(out, "aux {} = ", name)?;
        write_expr(out, expr, level + 1)?;
        out.push('\n');
    }
    indent(out, level);
    write!(out, "}} if ")?;
    write_expr(out, &op.pred, level)?;
    write!(out, " -> {}", op.output)
}

fn op_name(op: MathOp) -> &'static str {
    match op {
        MathOp::Add => "add",
        MathOp::Sub => "sub",
        MathOp::Mul => "mul",
        MathOp::Div => "div",
        MathOp::Pow => "pow",
        MathOp::Max => "max",
        MathOp::Min => "min",
        MathOp::Sqrt => "sqrt",
        MathOp::Abs => "abs",
        MathOp::Neg => "neg",
        MathOp::Ceil => "ceil",
        MathOp::Floor => "floor",
        MathOp::Lt => "lt",
        MathOp::Lte => "lte",
        MathOp::Gt => "gt",
        MathOp::Gte => "gte",
        MathOp::Eq => "eq",
        MathOp::Not => "not",
        MathOp::And => "and",
        MathOp::Or => "or",
    }
}

fn write_expr(out: &mut String, expr: &Expr, level: usize) -> fmt::Result {
    match &expr.kind {
        ExprKind::Const(val) => match val {
            ConstVal::Bool(b) => write!(out, "{}", b),
            ConstVal::Int(v) => write!(out, "{}", v),
            ConstVal::UInt(v) => write!(out, "{}u", v),
            ConstVal::Float(v) => write!(out, "{}f", v),
        },
        ExprKind::SymbolRef(name) => write!(out, "{}", name),
        ExprKind::Unary(op, a) => {
            write!(out, "{}(", op_name(*op))?;
            write_expr(out, a, level)?;
            write!(out, ")")
        }
        ExprKind::Binary(op, l, r) => {
            write!(out, "{}(", op_name(*op))?;
            write_expr(out, l, level)?;
            out.push_str(", ");
            write_expr(out, r, level)?;
            write!(out, ")")
        }
        ExprKind::Elem { stream, offset } => {
            write!(out, "elem(")?;
            write_expr(out, stream, level)?;
            write!(out, ", {})", offset)
        }
        ExprKind::Exists(e) => {
            write!(out, "exists(")?;
            write_expr(out, e, level)?;
            write!(out, ")")
        }
        ExprKind::Window { stream, lo, hi } => {
            write!(out, "window(")?;
            write_expr(out, stream, level)?;
            write!(out, ", [{}, {}])", lo, hi)
        }
        ExprKind::Reduce { win, init, step } => {
            write!(out, "reduce(")?;
            write_expr(out, win, level)?;
            out.push_str(", ");
            write_expr(out, init, level)?;
            write!(
                out,
                ", \\({}, {}, {}, {}) -> ",
                step.acc.name, step.win_start.name, step.win_end.name, step.elem.name
            )?;
            write_expr(out, &step.body, level)?;
            write!(out, ")")
        }
        ExprKind::New(fields) => {
            write!(out, "new{{")?;
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, field, level)?;
            }
            write!(out, "}}")
        }
        ExprKind::Get(input, n) => {
            write!(out, "get(")?;
            write_expr(out, input, level)?;
            write!(out, ", {})", n)
        }
        ExprKind::IfElse { cond, then, other } => {
            write!(out, "if ")?;
            write_expr(out, cond, level)?;
            write!(out, " then ")?;
            write_expr(out, then, level)?;
            write!(out, " else ")?;
            write_expr(out, other, level)
        }
        ExprKind::Loop(op) => write_op(out, op, level),
    }
}
