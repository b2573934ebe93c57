use crate::infer::{broadcast_shapes, expect_inputs, tensor_arg, InferError, InferInput, InferResult};
use crate::ir::prim::ATTR_DST_TYPE;
use crate::ir::{AbstractValue, DType, Primitive, TensorSpec, Value};

fn type_error(prim: &Primitive, input: &str, dtype: DType) -> InferError {
    InferError::TypeMismatch {
        op: prim.name.clone(),
        input: input.to_string(),
        dtype: dtype.to_string(),
    }
}

pub fn infer_identity(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    Ok(AbstractValue::Tensor(x))
}

pub fn infer_numeric_unary(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    if !x.dtype.is_numeric() {
        return Err(type_error(prim, "x", x.dtype));
    }
    Ok(AbstractValue::Tensor(x))
}

pub fn infer_float_unary(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    if !x.dtype.is_float() {
        return Err(type_error(prim, "x", x.dtype));
    }
    Ok(AbstractValue::Tensor(x))
}

pub fn infer_cast(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    let dst = match prim.attr(ATTR_DST_TYPE) {
        Some(Value::Type(dtype)) => *dtype,
        _ => match inputs.get(1).and_then(|i| i.literal.as_ref()) {
            Some(Value::Type(dtype)) => *dtype,
            _ => return Err(InferError::attr(&prim.name, ATTR_DST_TYPE, "missing target type")),
        },
    };
    Ok(AbstractValue::Tensor(TensorSpec::new(dst, x.shape)))
}

fn broadcast_pair(prim: &Primitive, inputs: &[InferInput]) -> Result<TensorSpec, InferError> {
    expect_inputs(prim, inputs, 2)?;
    let x = tensor_arg(prim, inputs, 0)?;
    let y = tensor_arg(prim, inputs, 1)?;
    if x.dtype != y.dtype {
        return Err(InferError::TypeMismatch {
            op: prim.name.clone(),
            input: "y".to_string(),
            dtype: format!("{} (x is {})", y.dtype, x.dtype),
        });
    }
    let shape = broadcast_shapes(&prim.name, &x.shape, &y.shape)?;
    Ok(TensorSpec::new(x.dtype, shape))
}

pub fn infer_binary(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let out = broadcast_pair(prim, inputs)?;
    if !out.dtype.is_numeric() {
        return Err(type_error(prim, "x", out.dtype));
    }
    Ok(AbstractValue::Tensor(out))
}

pub fn infer_compare(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let out = broadcast_pair(prim, inputs)?;
    Ok(AbstractValue::Tensor(TensorSpec::new(DType::Bool, out.shape)))
}

pub fn infer_logical(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let out = broadcast_pair(prim, inputs)?;
    if out.dtype != DType::Bool {
        return Err(type_error(prim, "x", out.dtype));
    }
    Ok(AbstractValue::Tensor(out))
}
