//! Typed payloads and the data-validity flag.

use std::fmt;

/// Validity flag carried by every update and by a property buffer.
///
/// `Faulty` data is still delivered (with a fresh timestamp) so downstream
/// consumers can detect staleness instead of silently freezing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DataValidity {
    /// The value is trustworthy.
    #[default]
    Ok,
    /// The producing side flagged the value as invalid.
    Faulty,
}

impl DataValidity {
    /// Whether the flag is [`DataValidity::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Combine two flags: the result is `Ok` only when both are.
    pub fn and(self, other: Self) -> Self {
        if self.is_ok() && other.is_ok() {
            Self::Ok
        } else {
            Self::Faulty
        }
    }
}

impl fmt::Display for DataValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Faulty => write!(f, "faulty"),
        }
    }
}

/// A typed payload: a scalar or a fixed-shape array.
///
/// The engine never interprets values beyond copying them between a
/// transfer source and a property buffer; the concrete wire or storage
/// representation is owned by the host.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A scalar integer.
    Int(i64),
    /// A scalar float.
    Float(f64),
    /// A fixed-shape integer array.
    IntArray(Vec<i64>),
    /// A fixed-shape float array.
    FloatArray(Vec<f64>),
}

impl Value {
    /// Scalar integer accessor. Returns `None` for other variants.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Scalar float accessor. Returns `None` for other variants.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Number of elements: 1 for scalars, the array length otherwise.
    pub fn len(&self) -> usize {
        match self {
            Self::Int(_) | Self::Float(_) => 1,
            Self::IntArray(v) => v.len(),
            Self::FloatArray(v) => v.len(),
        }
    }

    /// Whether there are no elements. Scalars count as 1, so only a
    /// zero-length array is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `other` has the same variant and element count.
    pub fn same_shape(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other) && self.len() == other.len()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::IntArray(v) => write!(f, "int[{}]", v.len()),
            Self::FloatArray(v) => write!(f, "float[{}]", v.len()),
        }
    }
}
