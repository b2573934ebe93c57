use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::types::{AbstractValue, DType, MonadKind, Shape, TensorSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Int(v) => v.len(),
            TensorData::Float(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Constant tensor payload. `data` is `None` for a declared tensor whose
/// contents were never materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorLiteral {
    pub dtype: DType,
    pub dims: Vec<i64>,
    pub data: Option<TensorData>,
}

impl TensorLiteral {
    pub fn i64_vector(values: Vec<i64>) -> Self {
        Self {
            dtype: DType::I64,
            dims: vec![values.len() as i64],
            data: Some(TensorData::Int(values)),
        }
    }

    pub fn without_data(dtype: DType, dims: Vec<i64>) -> Self {
        Self {
            dtype,
            dims,
            data: None,
        }
    }

    pub fn element_count(&self) -> i64 {
        self.dims.iter().product()
    }

    pub fn spec(&self) -> TensorSpec {
        TensorSpec::new(self.dtype, Shape::known(&self.dims))
    }

    pub fn int_values(&self) -> Option<&[i64]> {
        match &self.data {
            Some(TensorData::Int(values)) => Some(values),
            _ => None,
        }
    }
}

/// Compile-time value held by literal nodes and primitive attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Type(DType),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    StrList(Vec<String>),
    Tensor(TensorLiteral),
    Monad(MonadKind),
}

impl Value {
    pub fn abstract_value(&self) -> AbstractValue {
        match self {
            Value::None | Value::Str(_) | Value::Type(_) | Value::StrList(_) => {
                AbstractValue::None
            }
            Value::Bool(_) => AbstractValue::Scalar(DType::Bool),
            Value::Int(_) => AbstractValue::Scalar(DType::I64),
            Value::Float(_) => AbstractValue::Scalar(DType::F32),
            Value::IntList(items) => {
                AbstractValue::Tuple(vec![AbstractValue::Scalar(DType::I64); items.len()])
            }
            Value::FloatList(items) => {
                AbstractValue::Tuple(vec![AbstractValue::Scalar(DType::F32); items.len()])
            }
            Value::Tensor(tensor) => AbstractValue::Tensor(tensor.spec()),
            Value::Monad(kind) => AbstractValue::Monad(*kind),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Tensor(t) if t.dims.is_empty() => t.int_values()?.first().copied(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as an integer sequence. A bare integer is a
    /// single-element sequence; an integer tensor contributes its data.
    pub fn as_int_list(&self) -> Option<Vec<i64>> {
        match self {
            Value::Int(v) => Some(vec![*v]),
            Value::IntList(items) => Some(items.clone()),
            Value::Tensor(t) => t.int_values().map(|v| v.to_vec()),
            _ => None,
        }
    }

    /// True for empty lists and zero-element tensors.
    pub fn is_empty_sequence(&self) -> bool {
        match self {
            Value::IntList(items) => items.is_empty(),
            Value::FloatList(items) => items.is_empty(),
            Value::StrList(items) => items.is_empty(),
            Value::Tensor(t) => t.element_count() == 0,
            _ => false,
        }
    }

    pub fn is_monad(&self) -> bool {
        matches!(self, Value::Monad(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("none"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Type(t) => write!(f, "{t}"),
            Value::IntList(v) => write!(f, "{v:?}"),
            Value::FloatList(v) => write!(f, "{v:?}"),
            Value::StrList(v) => write!(f, "{v:?}"),
            Value::Tensor(t) => match &t.data {
                Some(TensorData::Int(v)) => write!(f, "tensor<{}>{:?}", t.dtype, v),
                Some(TensorData::Float(v)) => write!(f, "tensor<{}>{:?}", t.dtype, v),
                Some(TensorData::Bool(v)) => write!(f, "tensor<{}>{:?}", t.dtype, v),
                None => write!(f, "tensor<{}>{:?}(no data)", t.dtype, t.dims),
            },
            Value::Monad(kind) => write!(f, "{}", AbstractValue::Monad(*kind)),
        }
    }
}
