//! End-to-end query tests: build a graph on a session, fill buffers,
//! compile, execute, and check the output buffer.

use rivulet_engine::{Region, Session, Value};
use rivulet_graph::GraphNode;
use rivulet_ir::{ConstVal, Expr, ExprError, MathOp};
use rivulet_types::DataType;

fn int_const(v: i64) -> Expr {
    Expr::constant(DataType::Int64, ConstVal::Int(v)).unwrap()
}

fn add_const(v: i64) -> impl Fn(Expr) -> Result<Expr, ExprError> {
    move |e| Expr::binary(DataType::Int64, MathOp::Add, e, int_const(v))
}

fn add(l: Expr, r: Expr) -> Result<Expr, ExprError> {
    Expr::binary(DataType::Int64, MathOp::Add, l, r)
}

fn timed_session(t0: i64, t1: i64) -> Session {
    let mut s = Session::new();
    s.set_start_time(t0).unwrap();
    s.set_end_time(t1).unwrap();
    s
}

/// Fill `node`'s buffer with unit-width slots starting at the session
/// start time 0; `None` commits a gap.
fn fill(s: &mut Session, node: &GraphNode, values: &[Option<i64>]) {
    for (i, v) in values.iter().enumerate() {
        let t = i as i64 + 1;
        match v {
            Some(v) => {
                s.commit_data(node, t).unwrap();
                let idx = s.data_end_idx(node).unwrap();
                s.write_data(node, Value::Int(*v), t, idx).unwrap();
            }
            None => s.commit_null(node, t).unwrap(),
        }
    }
}

/// Present output elements as `(start, dur, payload)` triples.
fn present(out: &Region) -> Vec<(i64, i64, i64)> {
    (0..out.len())
        .filter_map(|i| {
            out.get_payload(i).map(|v| {
                let payload = match v {
                    Value::Int(x) => *x,
                    other => panic!("expected integer payload, got {other:?}"),
                };
                (out.get_ts(i).unwrap(), out.get_dur(i).unwrap(), payload)
            })
        })
        .collect()
}

#[test]
fn test_map_then_where_keeps_aligned_survivors() {
    let mut s = timed_session(0, 10);
    let src = s.create_input(16, DataType::Int64).unwrap();
    let query = src
        .map(add_const(10))
        .unwrap()
        .where_(|e| Expr::binary(DataType::Bool, MathOp::Gt, e, int_const(14)))
        .unwrap();

    let input: Vec<_> = (0..10).map(Some).collect();
    fill(&mut s, &src, &input);
    s.compile(&query, "map_where").unwrap();
    s.execute().unwrap();

    // Elements 5..=9 map to 15..=19 and pass the filter, each emitted on
    // its source element's span.
    let expected: Vec<_> = (5..10).map(|i| (i, 1, i + 10)).collect();
    assert_eq!(present(s.output().unwrap()), expected);
}

#[test]
fn test_where_passes_gaps_through_silently() {
    let mut s = timed_session(0, 6);
    let src = s.create_input(8, DataType::Int64).unwrap();
    let query = src
        .where_(|e| Expr::binary(DataType::Bool, MathOp::Gte, e, int_const(0)))
        .unwrap();

    fill(&mut s, &src, &[Some(1), None, Some(3), None, Some(5), Some(6)]);
    s.compile(&query, "filter").unwrap();
    s.execute().unwrap();

    assert_eq!(
        present(s.output().unwrap()),
        vec![(0, 1, 1), (2, 1, 3), (4, 1, 5), (5, 1, 6)]
    );
}

#[test]
fn test_tumbling_window_sum() {
    let mut s = timed_session(0, 12);
    let src = s.create_input(16, DataType::Int64).unwrap();
    let query = src
        .window(4, 4)
        .unwrap()
        .reduce(int_const(0), |acc, _t0, _t1, e| add(acc, e))
        .unwrap();

    let input: Vec<_> = (0..12).map(Some).collect();
    fill(&mut s, &src, &input);
    s.compile(&query, "windowed_sum").unwrap();
    s.execute().unwrap();

    // One output per window, covering [4k, 4(k+1)).
    assert_eq!(
        present(s.output().unwrap()),
        vec![(0, 4, 6), (4, 4, 22), (8, 4, 38)]
    );
}

#[test]
fn test_reduce_emits_init_for_empty_windows() {
    let mut s = timed_session(0, 8);
    let src = s.create_input(8, DataType::Int64).unwrap();
    let query = src
        .window(4, 4)
        .unwrap()
        .reduce(int_const(0), |acc, _t0, _t1, e| add(acc, e))
        .unwrap();

    // Data only in the second window.
    fill(&mut s, &src, &[None, None, None, None, Some(1), Some(2), Some(3), Some(4)]);
    s.compile(&query, "sparse_sum").unwrap();
    s.execute().unwrap();

    assert_eq!(present(s.output().unwrap()), vec![(0, 4, 0), (4, 4, 10)]);
}

#[test]
fn test_inner_join_emits_only_where_both_present() {
    let mut s = timed_session(0, 4);
    let left = s.create_input(8, DataType::Int64).unwrap();
    let right = s.create_input(8, DataType::Int64).unwrap();
    let query = left.inner_join(&right, add).unwrap();

    fill(&mut s, &left, &[Some(10), None, Some(30), Some(40)]);
    fill(&mut s, &right, &[Some(1), Some(2), Some(3), None]);
    s.compile(&query, "inner").unwrap();
    s.execute().unwrap();

    assert_eq!(present(s.output().unwrap()), vec![(0, 1, 11), (2, 1, 33)]);
}

#[test]
fn test_left_outer_join_substitutes_right_default() {
    let mut s = timed_session(0, 4);
    let left = s.create_input(8, DataType::Int64).unwrap();
    let right = s.create_input(8, DataType::Int64).unwrap();
    let query = left
        .left_outer_join(&right, add, int_const(-100))
        .unwrap();

    fill(&mut s, &left, &[Some(10), Some(20), None, Some(40)]);
    fill(&mut s, &right, &[Some(1), None, Some(3), Some(4)]);
    s.compile(&query, "left_outer").unwrap();
    s.execute().unwrap();

    // A missing left element emits nothing; a missing right element is
    // replaced by the default.
    assert_eq!(
        present(s.output().unwrap()),
        vec![(0, 1, 11), (1, 1, -80), (3, 1, 44)]
    );
}

#[test]
fn test_full_outer_join_substitutes_both_defaults() {
    let mut s = timed_session(0, 4);
    let left = s.create_input(8, DataType::Int64).unwrap();
    let right = s.create_input(8, DataType::Int64).unwrap();
    let query = left
        .full_outer_join(&right, add, int_const(-1), int_const(-100))
        .unwrap();

    fill(&mut s, &left, &[Some(10), Some(20), None, None]);
    fill(&mut s, &right, &[None, None, Some(1), Some(2)]);
    s.compile(&query, "full_outer").unwrap();
    s.execute().unwrap();

    assert_eq!(
        present(s.output().unwrap()),
        vec![(0, 1, -90), (1, 1, -80), (2, 1, 0), (3, 1, 1)]
    );
}

#[test]
fn test_self_join_over_two_maps() {
    let n = 200;
    let mut s = timed_session(0, n);
    let src = s.create_input(256, DataType::Int64).unwrap();

    let shifted = src.map(add_const(15)).unwrap();
    let plain = src.map(add_const(0)).unwrap();
    let query = shifted.inner_join(&plain, add).unwrap();

    let input: Vec<_> = (0..n).map(|i| Some(i + 1)).collect();
    fill(&mut s, &src, &input);
    s.compile(&query, "self_join").unwrap();
    s.execute().unwrap();

    let out = present(s.output().unwrap());
    assert_eq!(out.len(), n as usize);
    for (i, (start, dur, payload)) in out.iter().enumerate() {
        let i = i as i64;
        assert_eq!(*start, i);
        assert_eq!(*dur, 1);
        // (i+1+15) + (i+1) for the element on (i, i+1].
        assert_eq!(*payload, 2 * i + 17);
    }
}

#[test]
fn test_execute_can_be_repeated() {
    let mut s = timed_session(0, 10);
    let src = s.create_input(16, DataType::Int64).unwrap();
    let query = src.map(add_const(1)).unwrap();

    let input: Vec<_> = (0..10).map(Some).collect();
    fill(&mut s, &src, &input);
    s.compile(&query, "repeat").unwrap();

    s.execute().unwrap();
    let first = present(s.output().unwrap());
    s.execute().unwrap();
    let second = present(s.output().unwrap());

    let expected: Vec<_> = (0..10).map(|i| (i, 1, i + 1)).collect();
    assert_eq!(first, expected);
    assert_eq!(second, expected);
}

#[test]
fn test_map_after_reduce() {
    let mut s = timed_session(0, 9);
    let src = s.create_input(16, DataType::Int64).unwrap();
    let query = src
        .window(3, 3)
        .unwrap()
        .reduce(int_const(0), |acc, _t0, _t1, e| add(acc, e))
        .unwrap()
        .map(add_const(1))
        .unwrap();

    let input: Vec<_> = (1..=9).map(Some).collect();
    fill(&mut s, &src, &input);
    s.compile(&query, "sum_plus_one").unwrap();
    s.execute().unwrap();

    assert_eq!(
        present(s.output().unwrap()),
        vec![(0, 3, 7), (3, 3, 16), (6, 3, 25)]
    );
}
