//! Property-based tests for the builder merge.
//!
//! Verifies that merging two builders always yields the name-keyed union
//! of their tables with left bias, and that debug builds reject two
//! same-named symbols bound to different expressions.

use indexmap::IndexMap;
use proptest::prelude::*;

use rivulet_ir::{ConstVal, Expr, OpBuilder, OpError, Symbol};
use rivulet_types::{DataType, Iter, Type};

fn int_const(v: i64) -> Expr {
    Expr::constant(DataType::Int64, ConstVal::Int(v)).unwrap()
}

fn builder_from(entries: &[(String, i64)], inputs: &[String]) -> OpBuilder {
    let mut b = OpBuilder::new(Iter::new(0, 10));
    for name in inputs {
        b.add_input(Symbol::new(name.clone(), Type::stream(DataType::Int64)));
    }
    for (name, v) in entries {
        let sym = Symbol::new(name.clone(), Type::value(DataType::Int64));
        b.bind(&sym, int_const(*v));
    }
    b
}

/// Symbol names drawn from a small alphabet so collisions actually occur.
fn entry_vec() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec(("[a-e]", 0i64..4), 0..6).prop_map(|entries| {
        // Dedup within one side; a single table never holds a name twice.
        let mut seen = IndexMap::new();
        for (name, v) in entries {
            seen.entry(name).or_insert(v);
        }
        seen.into_iter().collect()
    })
}

fn input_vec() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[st][0-2]", 0..4).prop_map(|names| {
        let mut out: Vec<String> = Vec::new();
        for n in names {
            if !out.contains(&n) {
                out.push(n);
            }
        }
        out
    })
}

proptest! {
    #[test]
    fn merge_is_left_biased_union(
        left_entries in entry_vec(),
        right_entries in entry_vec(),
        left_inputs in input_vec(),
        right_inputs in input_vec(),
    ) {
        let mut left = builder_from(&left_entries, &left_inputs);
        let right = builder_from(&right_entries, &right_inputs);

        let collides = right_entries.iter().any(|(name, v)| {
            left_entries.iter().any(|(ln, lv)| ln == name && lv != v)
        });

        match left.merge(right) {
            Err(OpError::NameCollision(_)) => {
                prop_assert!(cfg!(debug_assertions) && collides);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
            Ok(()) => {
                prop_assert!(!(cfg!(debug_assertions) && collides));

                // Left entries first, in left order, with left values.
                for (i, (name, v)) in left_entries.iter().enumerate() {
                    prop_assert_eq!(left.syms.get_index(i).map(|(n, _)| n.as_str()), Some(name.as_str()));
                    prop_assert_eq!(left.syms.get(name.as_str()), Some(&int_const(*v)));
                }
                // Every right entry present; no duplicates possible in a map.
                for (name, _) in &right_entries {
                    prop_assert!(left.syms.contains_key(name.as_str()));
                }
                // Input union without duplication, left order preserved.
                for (i, name) in left_inputs.iter().enumerate() {
                    prop_assert_eq!(&left.inputs[i].name, name);
                }
                for name in &right_inputs {
                    prop_assert_eq!(
                        left.inputs.iter().filter(|s| &s.name == name).count(),
                        1
                    );
                }
            }
        }
    }
}
