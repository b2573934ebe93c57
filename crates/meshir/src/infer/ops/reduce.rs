use std::collections::BTreeSet;

use crate::infer::{
    int_list_arg, normalize_axis, ranked_dims, tensor_arg, InferError, InferInput, InferResult,
};
use crate::ir::prim::{ATTR_AXIS, ATTR_KEEP_DIMS};
use crate::ir::{AbstractValue, DType, Dim, Primitive, Shape, TensorSpec};

/// Normalized, deduplicated reduction axes. An empty list means every axis.
pub fn reduce_axes(op: &str, axes: &[i64], rank: usize) -> Result<BTreeSet<usize>, InferError> {
    if axes.is_empty() {
        return Ok((0..rank).collect());
    }
    axes.iter().map(|axis| normalize_axis(op, *axis, rank)).collect()
}

/// Reduce{Sum,Mean,Max,Min,Prod,All,Any}. The axis comes from the `axis`
/// attribute or a literal second input.
pub fn infer_reduce(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    let keep_dims = prim.bool_attr(ATTR_KEEP_DIMS).unwrap_or(false);
    if matches!(prim.name.as_str(), "ReduceAll" | "ReduceAny") {
        if x.dtype != DType::Bool {
            return Err(InferError::TypeMismatch {
                op: prim.name.clone(),
                input: "x".to_string(),
                dtype: x.dtype.to_string(),
            });
        }
    } else if !x.dtype.is_numeric() {
        return Err(InferError::TypeMismatch {
            op: prim.name.clone(),
            input: "x".to_string(),
            dtype: x.dtype.to_string(),
        });
    }
    let dims = ranked_dims(prim, &x)?;

    let Some(axes) = int_list_arg(prim, inputs, 1, ATTR_AXIS) else {
        if inputs.len() < 2 {
            // No axis at all reduces everything.
            return Ok(reduced(x.dtype, dims, &(0..dims.len()).collect(), keep_dims));
        }
        if keep_dims {
            let out = vec![Dim::Unknown; dims.len()];
            return Ok(AbstractValue::Tensor(TensorSpec::new(x.dtype, Shape::Ranked(out))));
        }
        return Err(InferError::undecided(&prim.name, "axis is not a constant"));
    };
    let axes = reduce_axes(&prim.name, &axes, dims.len())?;
    Ok(reduced(x.dtype, dims, &axes, keep_dims))
}

fn reduced(dtype: DType, dims: &[Dim], axes: &BTreeSet<usize>, keep_dims: bool) -> AbstractValue {
    let out: Vec<Dim> = dims
        .iter()
        .enumerate()
        .filter_map(|(i, d)| match (axes.contains(&i), keep_dims) {
            (true, true) => Some(Dim::Known(1)),
            (true, false) => None,
            (false, _) => Some(*d),
        })
        .collect();
    AbstractValue::Tensor(TensorSpec::new(dtype, Shape::Ranked(out)))
}

pub fn infer_softmax(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    if !x.dtype.is_float() {
        return Err(InferError::TypeMismatch {
            op: prim.name.clone(),
            input: "x".to_string(),
            dtype: x.dtype.to_string(),
        });
    }
    let rank = ranked_dims(prim, &x)?.len();
    for axis in prim.int_list_attr(ATTR_AXIS).unwrap_or_else(|| vec![-1]) {
        normalize_axis(&prim.name, axis, rank)?;
    }
    Ok(AbstractValue::Tensor(x))
}
