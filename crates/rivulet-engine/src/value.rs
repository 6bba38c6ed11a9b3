//! Runtime payload values.

use rivulet_types::DataType;

/// A runtime payload carried by one stream element.
///
/// Integers are widened to 64 bits at runtime; the declared `DataType`
/// still governs which constructors a payload is accepted for, via
/// [`Value::fits`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Ordered field values matching a struct type position by position.
    Struct(Vec<Value>),
}

impl Value {
    /// True when this value is a valid payload for `dtype`.
    pub fn fits(&self, dtype: &DataType) -> bool {
        match self {
            Value::Bool(_) => dtype.is_bool(),
            Value::Int(_) => dtype.is_int() && dtype.is_signed(),
            Value::UInt(_) => dtype.is_int() && !dtype.is_signed(),
            Value::Float(_) => dtype.is_float(),
            Value::Struct(fields) => {
                dtype.arity() == fields.len()
                    && fields
                        .iter()
                        .enumerate()
                        .all(|(i, f)| dtype.field(i).is_some_and(|ft| f.fits(ft)))
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}
