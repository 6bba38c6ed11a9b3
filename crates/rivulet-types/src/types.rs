//! Type definitions for Rivulet.

/// Payload types carried by stream elements.
///
/// Identity is structural: two struct types are equal when their field
/// types are equal position by position, regardless of where they were
/// declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Ordered list of field types, recursively nestable.
    Struct(Vec<DataType>),
}

impl DataType {
    pub fn is_struct(&self) -> bool {
        matches!(self, DataType::Struct(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, DataType::Bool)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_int(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
        )
    }

    /// Field type of a struct by position.
    pub fn field(&self, n: usize) -> Option<&DataType> {
        match self {
            DataType::Struct(fields) => fields.get(n),
            _ => None,
        }
    }

    /// Number of struct fields, 0 for scalars.
    pub fn arity(&self) -> usize {
        match self {
            DataType::Struct(fields) => fields.len(),
            _ => 0,
        }
    }
}

/// An iteration interval `[start, end)` over the time axis.
///
/// `end == -1` is the sentinel for an unbounded interval. The degenerate
/// interval `[0, 0)` marks value types that do not range over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iter {
    pub start: i64,
    pub end: i64,
}

/// Sentinel `end` marking an unbounded interval.
pub const UNBOUNDED: i64 = -1;

impl Iter {
    /// Create an interval `[start, end)`.
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(end == UNBOUNDED || start <= end, "interval start must not exceed end");
        Self { start, end }
    }

    /// The degenerate interval of a value type.
    pub fn value() -> Self {
        Self { start: 0, end: 0 }
    }

    /// An unbounded interval starting at `start`.
    pub fn unbounded(start: i64) -> Self {
        Self { start, end: UNBOUNDED }
    }

    pub fn is_unbounded(&self) -> bool {
        self.end == UNBOUNDED
    }

    pub fn is_value(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// Interval length; `None` when unbounded.
    pub fn len(&self) -> Option<i64> {
        if self.is_unbounded() {
            None
        } else {
            Some(self.end - self.start)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// A payload type paired with the iteration domain it ranges over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub dtype: DataType,
    pub iter: Iter,
}

impl Type {
    pub fn new(dtype: DataType, iter: Iter) -> Self {
        Self { dtype, iter }
    }

    /// A value type: a payload with no time extent.
    pub fn value(dtype: DataType) -> Self {
        Self { dtype, iter: Iter::value() }
    }

    /// A stream type over an unbounded history.
    pub fn stream(dtype: DataType) -> Self {
        Self { dtype, iter: Iter::unbounded(0) }
    }

    pub fn is_value(&self) -> bool {
        self.iter.is_value()
    }

    pub fn is_stream(&self) -> bool {
        !self.is_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = DataType::Struct(vec![DataType::Int32, DataType::Float64]);
        let b = DataType::Struct(vec![DataType::Int32, DataType::Float64]);
        let c = DataType::Struct(vec![DataType::Float64, DataType::Int32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nested_struct_fields() {
        let inner = DataType::Struct(vec![DataType::Bool, DataType::Int64]);
        let outer = DataType::Struct(vec![DataType::Float32, inner.clone()]);
        assert_eq!(outer.field(1), Some(&inner));
        assert_eq!(outer.field(1).and_then(|f| f.field(0)), Some(&DataType::Bool));
        assert_eq!(outer.field(2), None);
    }

    #[test]
    fn test_interval_bounds() {
        let bounded = Iter::new(0, 100);
        assert_eq!(bounded.len(), Some(100));
        assert!(!bounded.is_unbounded());

        let unbounded = Iter::unbounded(0);
        assert!(unbounded.is_unbounded());
        assert_eq!(unbounded.len(), None);
    }

    #[test]
    fn test_value_vs_stream_types() {
        let val = Type::value(DataType::Int32);
        assert!(val.is_value());

        let stream = Type::stream(DataType::Int32);
        assert!(stream.is_stream());
        assert_eq!(val.dtype, stream.dtype);
    }
}
