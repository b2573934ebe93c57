use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel used at the integer boundary for a dimension whose size is unknown.
pub const UNKNOWN_DIM: i64 = -1;
/// Sentinel used at the integer boundary for a shape whose rank is unknown.
pub const UNKNOWN_RANK: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::I8 | DType::I16 | DType::I32 | DType::I64 | DType::U8
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_float() || self.is_integer()
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Known(i64),
    Unknown,
}

impl Dim {
    pub fn from_i64(value: i64) -> Result<Self, ShapeError> {
        match value {
            UNKNOWN_DIM => Ok(Dim::Unknown),
            v if v >= 0 => Ok(Dim::Known(v)),
            v => Err(ShapeError::InvalidDim { value: v }),
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            Dim::Known(v) => v,
            Dim::Unknown => UNKNOWN_DIM,
        }
    }

    pub fn known(self) -> Option<i64> {
        match self {
            Dim::Known(v) => Some(v),
            Dim::Unknown => None,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Dim::Unknown)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(v) => write!(f, "{v}"),
            Dim::Unknown => f.write_str("?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("invalid dimension value {value}")]
    InvalidDim { value: i64 },
    #[error("unknown-rank sentinel must be the only element, got {dims:?}")]
    MisplacedRankSentinel { dims: Vec<i64> },
}

/// Tensor shape. Dimension and rank uncertainty are explicit variants, never
/// sentinel integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Ranked(Vec<Dim>),
    UnknownRank,
}

impl Shape {
    pub fn scalar() -> Self {
        Shape::Ranked(Vec::new())
    }

    /// Fully static shape.
    pub fn known(dims: &[i64]) -> Self {
        Shape::Ranked(dims.iter().map(|d| Dim::Known(*d)).collect())
    }

    pub fn from_dims(dims: Vec<Dim>) -> Self {
        Shape::Ranked(dims)
    }

    /// Parses the sentinel form: `[-2]` is unknown rank, `-1` entries are unknown dims.
    pub fn from_i64(values: &[i64]) -> Result<Self, ShapeError> {
        if values.contains(&UNKNOWN_RANK) {
            if values.len() == 1 {
                return Ok(Shape::UnknownRank);
            }
            return Err(ShapeError::MisplacedRankSentinel {
                dims: values.to_vec(),
            });
        }
        let dims = values
            .iter()
            .map(|v| Dim::from_i64(*v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Shape::Ranked(dims))
    }

    pub fn to_i64(&self) -> Vec<i64> {
        match self {
            Shape::Ranked(dims) => dims.iter().map(|d| d.to_i64()).collect(),
            Shape::UnknownRank => vec![UNKNOWN_RANK],
        }
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Ranked(dims) => Some(dims.len()),
            Shape::UnknownRank => None,
        }
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Shape::Ranked(dims) => Some(dims),
            Shape::UnknownRank => None,
        }
    }

    /// Returns the dimensions when every one of them is known.
    pub fn static_dims(&self) -> Option<Vec<i64>> {
        self.dims()?.iter().map(|d| d.known()).collect()
    }

    pub fn is_unknown_rank(&self) -> bool {
        matches!(self, Shape::UnknownRank)
    }

    /// True if the rank or any dimension is unknown.
    pub fn is_dynamic(&self) -> bool {
        match self {
            Shape::Ranked(dims) => dims.iter().any(|d| d.is_unknown()),
            Shape::UnknownRank => true,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Shape::Ranked(dims) if dims.is_empty())
    }

    pub fn element_count(&self) -> Option<i64> {
        self.static_dims().map(|dims| dims.iter().product())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::UnknownRank => f.write_str("[*]"),
            Shape::Ranked(dims) => {
                f.write_str("[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{d}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MonadKind {
    Universal,
    Io,
}

/// Name of a function graph referenced from another graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphId(pub String);

impl GraphId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Abstract value attached to a node after inference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbstractValue {
    Tensor(TensorSpec),
    Scalar(DType),
    Tuple(Vec<AbstractValue>),
    Monad(MonadKind),
    /// A function graph used as a value.
    Func(GraphId),
    None,
}

impl AbstractValue {
    pub fn tensor(dtype: DType, dims: &[i64]) -> Self {
        AbstractValue::Tensor(TensorSpec::new(dtype, Shape::known(dims)))
    }

    pub fn tensor_with_shape(dtype: DType, shape: Shape) -> Self {
        AbstractValue::Tensor(TensorSpec::new(dtype, shape))
    }

    pub fn as_tensor(&self) -> Option<&TensorSpec> {
        match self {
            AbstractValue::Tensor(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.as_tensor().map(|spec| &spec.shape)
    }

    pub fn dtype(&self) -> Option<DType> {
        match self {
            AbstractValue::Tensor(spec) => Some(spec.dtype),
            AbstractValue::Scalar(dtype) => Some(*dtype),
            _ => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            AbstractValue::Tensor(spec) => spec.shape.rank(),
            AbstractValue::Scalar(_) => Some(0),
            _ => None,
        }
    }

    pub fn is_monad(&self) -> bool {
        matches!(self, AbstractValue::Monad(_))
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            AbstractValue::Tensor(spec) => spec.shape.is_dynamic(),
            AbstractValue::Tuple(items) => items.iter().any(|item| item.is_dynamic()),
            _ => false,
        }
    }

    /// Selects the value flowing out of output slot `index`.
    pub fn output(&self, index: u32) -> Option<&AbstractValue> {
        match self {
            AbstractValue::Tuple(items) => items.get(index as usize),
            other if index == 0 => Some(other),
            _ => None,
        }
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractValue::Tensor(spec) => write!(f, "{spec}"),
            AbstractValue::Scalar(dtype) => write!(f, "{dtype}"),
            AbstractValue::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            AbstractValue::Monad(MonadKind::Universal) => f.write_str("U"),
            AbstractValue::Monad(MonadKind::Io) => f.write_str("IO"),
            AbstractValue::Func(graph) => write!(f, "func {graph}"),
            AbstractValue::None => f.write_str("none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trip() {
        let shape = Shape::from_i64(&[2, UNKNOWN_DIM, 4]).unwrap();
        assert_eq!(shape.to_i64(), vec![2, -1, 4]);
        assert!(shape.is_dynamic());
        assert_eq!(Shape::from_i64(&[UNKNOWN_RANK]).unwrap(), Shape::UnknownRank);
        assert!(Shape::from_i64(&[3, UNKNOWN_RANK]).is_err());
        assert!(Shape::from_i64(&[-7]).is_err());
    }
}
