//! Query graph nodes and combinators.
//!
//! The graph is built top-down by user calls and lowered bottom-up from
//! the terminal node. Topology is immutable once created: successors are
//! appended, never removed, and every node gets freshly constructed
//! successor/predecessor lists of its own.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rivulet_ir::{Expr, ExprError, OpBuilder};
use rivulet_types::DataType;

use crate::error::GraphError;
use crate::operator::{Operator, SourceOp};

/// Shared graph context owning the node-id counter.
///
/// The counter generates unique operator names, which in turn keep symbol
/// names globally unique across one graph — the precondition the builder
/// merge relies on. It is owned by a compilation session, never a
/// process-wide global, so independent sessions never share id sequences.
#[derive(Debug, Default)]
pub struct GraphCtx {
    next_id: Cell<u64>,
}

impl GraphCtx {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Allocate the next node id.
    pub fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

struct NodeInner {
    id: u64,
    ctx: Rc<GraphCtx>,
    op: Operator,
    prev: Vec<GraphNode>,
    next: RefCell<Vec<Weak<NodeInner>>>,
}

/// A node in the query graph, wrapping one dataflow operator with up to
/// two predecessors. Cheap to clone; clones share the node.
#[derive(Clone)]
pub struct GraphNode {
    inner: Rc<NodeInner>,
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.inner.id)
            .field("op", &self.inner.op)
            .finish()
    }
}

impl GraphNode {
    /// Create a source node over a raw input stream.
    pub fn source(
        ctx: &Rc<GraphCtx>,
        name: impl Into<String>,
        dtype: DataType,
        batch_time: i64,
    ) -> Result<GraphNode, GraphError> {
        let op = Operator::Source(SourceOp::new(name, dtype, batch_time)?);
        Ok(Self::fresh(ctx, op, Vec::new()))
    }

    fn fresh(ctx: &Rc<GraphCtx>, op: Operator, prev: Vec<GraphNode>) -> GraphNode {
        let node = GraphNode {
            inner: Rc::new(NodeInner {
                id: ctx.next_id(),
                ctx: Rc::clone(ctx),
                op,
                prev,
                next: RefCell::new(Vec::new()),
            }),
        };
        for p in &node.inner.prev {
            p.inner.next.borrow_mut().push(Rc::downgrade(&node.inner));
        }
        node
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn operator(&self) -> &Operator {
        &self.inner.op
    }

    /// True when this node and `other` share the same underlying node.
    pub fn same_node(&self, other: &GraphNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// True when this node was created from `ctx`.
    ///
    /// Node ids are only unique within one context, so ownership checks
    /// must compare contexts, never ids.
    pub fn same_ctx(&self, ctx: &Rc<GraphCtx>) -> bool {
        Rc::ptr_eq(&self.inner.ctx, ctx)
    }

    fn guard_not_window(&self, what: &'static str) -> Result<(), GraphError> {
        if self.inner.op.is_window() {
            Err(GraphError::AfterWindow(what))
        } else {
            Ok(())
        }
    }

    /// Attach a map operator transforming each element.
    pub fn map(
        &self,
        f: impl Fn(Expr) -> Result<Expr, ExprError> + 'static,
    ) -> Result<GraphNode, GraphError> {
        self.guard_not_window("map")?;
        let name = format!("map_{}", self.inner.ctx.next_id());
        Ok(Self::fresh(
            &self.inner.ctx,
            Operator::Map { name, f: Rc::new(f) },
            vec![self.clone()],
        ))
    }

    /// Attach a where operator filtering elements by a predicate.
    pub fn where_(
        &self,
        pred: impl Fn(Expr) -> Result<Expr, ExprError> + 'static,
    ) -> Result<GraphNode, GraphError> {
        self.guard_not_window("where")?;
        let name = format!("where_{}", self.inner.ctx.next_id());
        Ok(Self::fresh(
            &self.inner.ctx,
            Operator::Where { name, pred: Rc::new(pred) },
            vec![self.clone()],
        ))
    }

    /// Attach a tumbling window; must be consumed by `reduce`.
    pub fn window(&self, size: i64, stride: i64) -> Result<GraphNode, GraphError> {
        self.guard_not_window("window")?;
        if size != stride {
            return Err(GraphError::SlidingWindow { size, stride });
        }
        let name = format!("window_{}", self.inner.ctx.next_id());
        Ok(Self::fresh(
            &self.inner.ctx,
            Operator::Window { name, size, stride },
            vec![self.clone()],
        ))
    }

    /// Attach a windowed reduce; only valid directly after `window`.
    pub fn reduce(
        &self,
        init: Expr,
        step: impl Fn(Expr, Expr, Expr, Expr) -> Result<Expr, ExprError> + 'static,
    ) -> Result<GraphNode, GraphError> {
        let (size, stride) = self
            .inner
            .op
            .window_params()
            .ok_or(GraphError::ReduceWithoutWindow)?;
        let name = format!("reduce_{}", self.inner.ctx.next_id());
        Ok(Self::fresh(
            &self.inner.ctx,
            Operator::Reduce { name, init, step: Rc::new(step), size, stride },
            vec![self.clone()],
        ))
    }

    fn guard_join(&self, right: &GraphNode) -> Result<(), GraphError> {
        self.guard_not_window("join")?;
        right.guard_not_window("join")
    }

    /// Join emitting a result only where both sides are present.
    pub fn inner_join(
        &self,
        right: &GraphNode,
        join: impl Fn(Expr, Expr) -> Result<Expr, ExprError> + 'static,
    ) -> Result<GraphNode, GraphError> {
        self.guard_join(right)?;
        let name = format!("join_{}", self.inner.ctx.next_id());
        Ok(Self::fresh(
            &self.inner.ctx,
            Operator::InnerJoin { name, join: Rc::new(join) },
            vec![self.clone(), right.clone()],
        ))
    }

    /// Join emitting wherever the left side is present, substituting
    /// `right_default` for a missing right element.
    pub fn left_outer_join(
        &self,
        right: &GraphNode,
        join: impl Fn(Expr, Expr) -> Result<Expr, ExprError> + 'static,
        right_default: Expr,
    ) -> Result<GraphNode, GraphError> {
        self.guard_join(right)?;
        let name = format!("join_{}", self.inner.ctx.next_id());
        Ok(Self::fresh(
            &self.inner.ctx,
            Operator::LeftOuterJoin { name, join: Rc::new(join), right_default },
            vec![self.clone(), right.clone()],
        ))
    }

    /// Join emitting wherever either side is present, substituting the
    /// respective default for a missing element.
    pub fn full_outer_join(
        &self,
        right: &GraphNode,
        join: impl Fn(Expr, Expr) -> Result<Expr, ExprError> + 'static,
        left_default: Expr,
        right_default: Expr,
    ) -> Result<GraphNode, GraphError> {
        self.guard_join(right)?;
        let name = format!("join_{}", self.inner.ctx.next_id());
        Ok(Self::fresh(
            &self.inner.ctx,
            Operator::FullOuterJoin {
                name,
                join: Rc::new(join),
                left_default,
                right_default,
            },
            vec![self.clone(), right.clone()],
        ))
    }

    /// Lower this node and everything upstream of it into one builder.
    ///
    /// Depth-first, left predecessor first; sources are the base case. A
    /// window with no consumer cannot be lowered.
    pub fn lower(&self) -> Result<OpBuilder, GraphError> {
        if self.inner.op.is_window() && self.inner.next.borrow().is_empty() {
            return Err(GraphError::TerminalWindow);
        }
        let mut builders = Vec::with_capacity(self.inner.prev.len());
        for prev in &self.inner.prev {
            builders.push(prev.lower()?);
        }
        self.inner.op.lower(builders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_ir::{ConstVal, ExprKind, MathOp};

    fn f32_source(ctx: &Rc<GraphCtx>, batch: i64) -> GraphNode {
        GraphNode::source(ctx, "in", DataType::Float32, batch).unwrap()
    }

    fn add_const(v: f64) -> impl Fn(Expr) -> Result<Expr, ExprError> {
        move |e| {
            Expr::binary(
                DataType::Float32,
                MathOp::Add,
                e,
                Expr::constant(DataType::Float32, ConstVal::Float(v))?,
            )
        }
    }

    #[test]
    fn test_ids_are_per_context() {
        let a = GraphCtx::new();
        let b = GraphCtx::new();
        assert_eq!(a.next_id(), 1);
        assert_eq!(a.next_id(), 2);
        assert_eq!(b.next_id(), 1);
    }

    #[test]
    fn test_node_ownership_is_by_context() {
        let a = GraphCtx::new();
        let b = GraphCtx::new();
        let node = f32_source(&a, 100);
        assert!(node.same_ctx(&a));
        assert!(!node.same_ctx(&b));
    }

    #[test]
    fn test_source_lowering_shape() {
        let ctx = GraphCtx::new();
        let src = f32_source(&ctx, 100);
        let b = src.lower().unwrap();

        assert_eq!(b.iter.start, 0);
        assert_eq!(b.iter.end, 100);
        assert_eq!(b.inputs.len(), 1);
        assert_eq!(b.inputs[0].name, "in");
        let out = b.output.as_ref().unwrap();
        assert_eq!(out.name, "win_100_in");
        assert!(matches!(
            b.syms.get(&out.name).map(|e| &e.kind),
            Some(ExprKind::Window { lo: -100, hi: 0, .. })
        ));
    }

    #[test]
    fn test_map_lowers_to_nested_op() {
        let ctx = GraphCtx::new();
        let mapped = f32_source(&ctx, 100).map(add_const(1.0)).unwrap();
        let b = mapped.lower().unwrap();

        let out = b.output.as_ref().unwrap();
        let nested = b.syms.get(&out.name).unwrap();
        let op = match &nested.kind {
            ExprKind::Loop(op) => op,
            other => panic!("expected nested op, got {other:?}"),
        };
        assert_eq!(op.iter, rivulet_types::Iter::new(0, 1));
        assert_eq!(op.inputs.len(), 1);
        assert_eq!(op.inputs[0].name, "win_100_in");
        assert!(matches!(op.pred.kind, ExprKind::Exists(_)));
        assert!(op.output.starts_with("map_"));
    }

    #[test]
    fn test_where_keeps_element_as_output() {
        let ctx = GraphCtx::new();
        let filtered = f32_source(&ctx, 100)
            .where_(|e| {
                Expr::binary(
                    DataType::Bool,
                    MathOp::Gt,
                    e,
                    Expr::constant(DataType::Float32, ConstVal::Float(0.0))?,
                )
            })
            .unwrap();
        let b = filtered.lower().unwrap();

        let out = b.output.as_ref().unwrap();
        let op = match &b.syms.get(&out.name).unwrap().kind {
            ExprKind::Loop(op) => op,
            other => panic!("expected nested op, got {other:?}"),
        };
        // Predicate is exists(e) AND p(e); output is the element itself.
        assert!(matches!(op.pred.kind, ExprKind::Binary(MathOp::And, _, _)));
        assert!(op.output.starts_with("e_"));
    }

    #[test]
    fn test_window_is_pure_metadata() {
        let ctx = GraphCtx::new();
        let src = f32_source(&ctx, 100);
        let win = src.window(10, 10).unwrap();
        let red = win
            .reduce(
                Expr::constant(DataType::Float32, ConstVal::Float(0.0)).unwrap(),
                |acc, _t0, _t1, e| Expr::binary(DataType::Float32, MathOp::Add, acc, e),
            )
            .unwrap();
        let b = red.lower().unwrap();

        // The window node itself contributed no symbols.
        let out = b.output.as_ref().unwrap();
        let op = match &b.syms.get(&out.name).unwrap().kind {
            ExprKind::Loop(op) => op,
            other => panic!("expected nested op, got {other:?}"),
        };
        assert_eq!(op.iter, rivulet_types::Iter::new(0, 10));
        let keys: Vec<_> = op.syms.keys().map(String::as_str).collect();
        assert!(keys[0].starts_with("win_10_10_"));
        assert!(keys[1].starts_with("red_"));
        assert_eq!(op.output, keys[1]);
    }

    #[test]
    fn test_sliding_window_rejected() {
        let ctx = GraphCtx::new();
        let err = f32_source(&ctx, 100).window(10, 5).unwrap_err();
        assert!(matches!(err, GraphError::SlidingWindow { size: 10, stride: 5 }));
    }

    #[test]
    fn test_map_after_window_rejected() {
        let ctx = GraphCtx::new();
        let win = f32_source(&ctx, 100).window(10, 10).unwrap();
        assert!(matches!(win.map(add_const(1.0)), Err(GraphError::AfterWindow("map"))));
        assert!(matches!(
            win.where_(|_| Ok(Expr::const_true())),
            Err(GraphError::AfterWindow("where"))
        ));
        assert!(matches!(win.window(5, 5), Err(GraphError::AfterWindow("window"))));
    }

    #[test]
    fn test_join_after_window_rejected() {
        let ctx = GraphCtx::new();
        let left = f32_source(&ctx, 100);
        let win = f32_source(&ctx, 100).window(10, 10).unwrap();
        let err = left
            .inner_join(&win, |l, r| Expr::binary(DataType::Float32, MathOp::Add, l, r))
            .unwrap_err();
        assert!(matches!(err, GraphError::AfterWindow("join")));
    }

    #[test]
    fn test_reduce_requires_window() {
        let ctx = GraphCtx::new();
        let src = f32_source(&ctx, 100);
        let err = src
            .reduce(
                Expr::constant(DataType::Float32, ConstVal::Float(0.0)).unwrap(),
                |acc, _t0, _t1, e| Expr::binary(DataType::Float32, MathOp::Add, acc, e),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::ReduceWithoutWindow));
    }

    #[test]
    fn test_terminal_window_cannot_lower() {
        let ctx = GraphCtx::new();
        let win = f32_source(&ctx, 100).window(10, 10).unwrap();
        assert!(matches!(win.lower(), Err(GraphError::TerminalWindow)));
    }

    #[test]
    fn test_join_merges_shared_source_without_duplication() {
        let ctx = GraphCtx::new();
        let src = f32_source(&ctx, 200);
        let left = src.map(add_const(15.0)).unwrap();
        let right = src.map(add_const(0.0)).unwrap();
        let joined = left
            .inner_join(&right, |l, r| Expr::binary(DataType::Float32, MathOp::Add, l, r))
            .unwrap();
        let b = joined.lower().unwrap();

        // Both branches lowered from the same source; one input, one
        // history window, two map ops and the join op.
        assert_eq!(b.inputs.len(), 1);
        let keys: Vec<_> = b.syms.keys().cloned().collect();
        assert_eq!(keys.iter().filter(|k| k.starts_with("win_200_")).count(), 1);
        assert_eq!(keys.iter().filter(|k| k.starts_with("map_")).count(), 2);
        assert_eq!(keys.iter().filter(|k| k.starts_with("join_")).count(), 1);

        let op = b.finish().unwrap();
        assert_eq!(op.inputs.len(), 1);
    }

    #[test]
    fn test_left_outer_join_substitutes_right_default() {
        let ctx = GraphCtx::new();
        let left = f32_source(&ctx, 100);
        let right = f32_source(&ctx, 100);
        let joined = left
            .left_outer_join(
                &right,
                |l, r| Expr::binary(DataType::Float32, MathOp::Add, l, r),
                Expr::constant(DataType::Float32, ConstVal::Float(0.0)).unwrap(),
            )
            .unwrap();
        let b = joined.lower().unwrap();

        let out = b.output.as_ref().unwrap();
        let op = match &b.syms.get(&out.name).unwrap().kind {
            ExprKind::Loop(op) => op,
            other => panic!("expected nested op, got {other:?}"),
        };
        // Predicate is exists(left) alone; the right side flows through an
        // if/else substitution.
        assert!(matches!(op.pred.kind, ExprKind::Exists(_)));
        assert!(op.syms.keys().any(|k| k.ends_with("_val")));
        assert_eq!(op.inputs.len(), 2);
    }

    #[test]
    fn test_full_outer_join_predicate_is_or() {
        let ctx = GraphCtx::new();
        let left = f32_source(&ctx, 100);
        let right = f32_source(&ctx, 100);
        let zero = Expr::constant(DataType::Float32, ConstVal::Float(0.0)).unwrap();
        let joined = left
            .full_outer_join(
                &right,
                |l, r| Expr::binary(DataType::Float32, MathOp::Add, l, r),
                zero.clone(),
                zero,
            )
            .unwrap();
        let b = joined.lower().unwrap();

        let out = b.output.as_ref().unwrap();
        let op = match &b.syms.get(&out.name).unwrap().kind {
            ExprKind::Loop(op) => op,
            other => panic!("expected nested op, got {other:?}"),
        };
        assert!(matches!(op.pred.kind, ExprKind::Binary(MathOp::Or, _, _)));
        // Both sides substituted.
        assert_eq!(op.syms.keys().filter(|k| k.ends_with("_val")).count(), 2);
    }

    #[test]
    fn test_two_sources_join_appends_right_inputs() {
        let ctx = GraphCtx::new();
        let left = GraphNode::source(&ctx, "lhs", DataType::Float32, 100).unwrap();
        let right = GraphNode::source(&ctx, "rhs", DataType::Float32, 100).unwrap();
        let joined = left
            .inner_join(&right, |l, r| Expr::binary(DataType::Float32, MathOp::Add, l, r))
            .unwrap();
        let b = joined.lower().unwrap();

        let names: Vec<_> = b.inputs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["lhs", "rhs"]);
    }
}
