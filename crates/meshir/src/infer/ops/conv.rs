use crate::infer::{
    conv_output_dim, expect_inputs, ranked_dims, tensor_arg, Conv3dWindow, InferError, InferInput,
    InferResult,
};
use crate::ir::{AbstractValue, Dim, Primitive, Shape, TensorSpec};

const NCDHW: usize = 5;
/// Longest shape a non-literal size operand may describe.
const MAX_SIZE_RANK: i64 = 8;

fn check_rank5(prim: &Primitive, what: &str, dims: &[Dim], shape: &Shape) -> Result<(), InferError> {
    if dims.len() != NCDHW {
        return Err(InferError::mismatch(
            &prim.name,
            format!("{what} must be 5-D (NCDHW), got {shape}"),
        ));
    }
    Ok(())
}

pub fn infer_conv3d(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 2)?;
    let x = tensor_arg(prim, inputs, 0)?;
    let w = tensor_arg(prim, inputs, 1)?;
    let dx = ranked_dims(prim, &x)?;
    let dw = ranked_dims(prim, &w)?;
    check_rank5(prim, "x", dx, &x.shape)?;
    check_rank5(prim, "weight", dw, &w.shape)?;
    let window = Conv3dWindow::from_primitive(prim)?;
    let mut out = vec![dx[0], dw[0]];
    for axis in 0..3 {
        out.push(conv_output_dim(
            window.mode,
            dx[axis + 2],
            window.kernel[axis],
            window.stride[axis],
            window.dilation[axis],
            (window.pad[axis * 2], window.pad[axis * 2 + 1]),
        ));
    }
    Ok(AbstractValue::Tensor(TensorSpec::new(x.dtype, Shape::Ranked(out))))
}

/// Shape described by a size operand: a literal list or tensor gives exact
/// values, otherwise only the length is known.
pub fn size_operand_shape(prim: &Primitive, input: &InferInput) -> Result<Shape, InferError> {
    if let Some(literal) = &input.literal {
        return match literal.as_int_list() {
            Some(values) => Shape::from_i64(&values)
                .map_err(|e| InferError::attr(&prim.name, "input_size", e.to_string())),
            None => Err(InferError::TypeMismatch {
                op: prim.name.clone(),
                input: "input_size".to_string(),
                dtype: literal.to_string(),
            }),
        };
    }
    match &input.value {
        AbstractValue::Tensor(spec) => match spec.shape.static_dims() {
            Some(d) if d.len() == 1 => {
                if !(0..=MAX_SIZE_RANK).contains(&d[0]) {
                    return Err(InferError::mismatch(
                        &prim.name,
                        format!("input_size describes a rank {} shape, limit is {MAX_SIZE_RANK}", d[0]),
                    ));
                }
                Ok(Shape::Ranked(vec![Dim::Unknown; d[0] as usize]))
            }
            Some(_) => Err(InferError::mismatch(
                &prim.name,
                format!("input_size must be one-dimensional, got {}", spec.shape),
            )),
            None => Ok(Shape::UnknownRank),
        },
        AbstractValue::Tuple(items) => Ok(Shape::Ranked(vec![Dim::Unknown; items.len()])),
        other => Err(InferError::TypeMismatch {
            op: prim.name.clone(),
            input: "input_size".to_string(),
            dtype: other.to_string(),
        }),
    }
}

/// Conv3DBackpropInput(filter, dout, input_size).
pub fn infer_conv3d_backprop_input(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 3)?;
    let dout = tensor_arg(prim, inputs, 1)?;
    let shape = size_operand_shape(prim, &inputs[2])?;
    if shape.is_unknown_rank() {
        return Err(InferError::undecided(&prim.name, "input_size has unknown length"));
    }
    Ok(AbstractValue::Tensor(TensorSpec::new(dout.dtype, shape)))
}

/// Conv3DBackpropFilter(x, dout, filter_size).
pub fn infer_conv3d_backprop_filter(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 3)?;
    let x = tensor_arg(prim, inputs, 0)?;
    let shape = size_operand_shape(prim, &inputs[2])?;
    if shape.is_unknown_rank() {
        return Err(InferError::undecided(&prim.name, "filter_size has unknown length"));
    }
    Ok(AbstractValue::Tensor(TensorSpec::new(x.dtype, shape)))
}
