use crate::infer::{expect_inputs, InferError, InferInput, InferResult};
use crate::ir::prim::{ATTR_DTYPE, ATTR_SHAPE};
use crate::ir::{AbstractValue, MonadKind, Primitive, Shape, TensorSpec, Value};

/// Depend(value, anchor...) and Load(param, monad) forward their first input.
pub fn infer_forward_first(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 1)?;
    Ok(inputs[0].value.clone())
}

pub fn infer_update_state(_prim: &Primitive, _inputs: &[InferInput]) -> InferResult {
    Ok(AbstractValue::Monad(MonadKind::Universal))
}

pub fn infer_make_tuple(_prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    Ok(AbstractValue::Tuple(
        inputs.iter().map(|input| input.value.clone()).collect(),
    ))
}

pub fn infer_tuple_get_item(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 1)?;
    let index = prim
        .int_attr("index")
        .or_else(|| inputs.get(1).and_then(|i| i.literal.as_ref()).and_then(Value::as_int))
        .ok_or_else(|| InferError::undecided(&prim.name, "index is not a constant"))?;
    match &inputs[0].value {
        AbstractValue::Tuple(items) => usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| {
                InferError::mismatch(
                    &prim.name,
                    format!("index {index} out of range for {}", inputs[0].value),
                )
            }),
        other => Err(InferError::TypeMismatch {
            op: prim.name.clone(),
            input: "tuple".to_string(),
            dtype: other.to_string(),
        }),
    }
}

pub fn infer_send(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 1)?;
    Ok(AbstractValue::None)
}

/// Receive carries the transferred tensor's description in its attributes.
pub fn infer_receive(prim: &Primitive, _inputs: &[InferInput]) -> InferResult {
    let shape = prim
        .int_list_attr(ATTR_SHAPE)
        .ok_or_else(|| InferError::attr(&prim.name, ATTR_SHAPE, "missing"))?;
    let shape =
        Shape::from_i64(&shape).map_err(|e| InferError::attr(&prim.name, ATTR_SHAPE, e.to_string()))?;
    let dtype = match prim.attr(ATTR_DTYPE) {
        Some(Value::Type(dtype)) => *dtype,
        _ => return Err(InferError::attr(&prim.name, ATTR_DTYPE, "missing")),
    };
    Ok(AbstractValue::Tensor(TensorSpec::new(dtype, shape)))
}
