use crate::infer::{
    expect_inputs, ranked_dims, tensor_arg, InferError, InferInput, InferResult,
};
use crate::ir::prim::{ATTR_TRANSPOSE_A, ATTR_TRANSPOSE_B};
use crate::ir::{AbstractValue, Dim, Primitive, Shape, TensorSpec};

/// Transpose flags, accepting the `transpose_x1/x2` spelling as well.
pub fn transpose_flags(prim: &Primitive) -> (bool, bool) {
    let a = prim
        .bool_attr(ATTR_TRANSPOSE_A)
        .or_else(|| prim.bool_attr("transpose_x1"))
        .unwrap_or(false);
    let b = prim
        .bool_attr(ATTR_TRANSPOSE_B)
        .or_else(|| prim.bool_attr("transpose_x2"))
        .unwrap_or(false);
    (a, b)
}

fn dims_agree(x: Dim, y: Dim) -> bool {
    match (x, y) {
        (Dim::Known(x), Dim::Known(y)) => x == y,
        _ => true,
    }
}

fn batch_dim(prim: &Primitive, a: Dim, b: Dim, sa: &Shape, sb: &Shape) -> Result<Dim, InferError> {
    match (a, b) {
        (Dim::Known(x), Dim::Known(y)) => {
            let (hi, lo) = if x >= y { (x, y) } else { (y, x) };
            if lo == 0 || hi % lo != 0 {
                return Err(InferError::mismatch(
                    &prim.name,
                    format!("batch dimensions of {sa} and {sb} are not divisible ({x} vs {y})"),
                ));
            }
            Ok(Dim::Known(hi))
        }
        (Dim::Known(1), other) | (other, Dim::Known(1)) => Ok(other),
        (Dim::Known(v), Dim::Unknown) | (Dim::Unknown, Dim::Known(v)) => Ok(Dim::Known(v)),
        (Dim::Unknown, Dim::Unknown) => Ok(Dim::Unknown),
    }
}

/// MatMul / BatchMatMul. 1-D operands are promoted and the added dimension is
/// dropped from the result.
pub fn infer_matmul(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 2)?;
    let a = tensor_arg(prim, inputs, 0)?;
    let b = tensor_arg(prim, inputs, 1)?;
    if a.dtype != b.dtype {
        return Err(InferError::TypeMismatch {
            op: prim.name.clone(),
            input: "b".to_string(),
            dtype: format!("{} (a is {})", b.dtype, a.dtype),
        });
    }
    let (ta, tb) = transpose_flags(prim);
    let mut da = ranked_dims(prim, &a)?.to_vec();
    let mut db = ranked_dims(prim, &b)?.to_vec();
    if da.is_empty() || db.is_empty() {
        return Err(InferError::mismatch(
            &prim.name,
            format!("operands must have rank >= 1, got {} and {}", a.shape, b.shape),
        ));
    }
    let a_vector = da.len() == 1;
    let b_vector = db.len() == 1;
    if a_vector {
        da.insert(0, Dim::Known(1));
    }
    if b_vector {
        db.push(Dim::Known(1));
    }

    let (m, ka) = if ta && !a_vector {
        (da[da.len() - 1], da[da.len() - 2])
    } else {
        (da[da.len() - 2], da[da.len() - 1])
    };
    let (kb, n) = if tb && !b_vector {
        (db[db.len() - 1], db[db.len() - 2])
    } else {
        (db[db.len() - 2], db[db.len() - 1])
    };
    if !dims_agree(ka, kb) {
        return Err(InferError::mismatch(
            &prim.name,
            format!(
                "contracted dimensions differ: {} (transpose_a={ta}) vs {} (transpose_b={tb})",
                a.shape, b.shape
            ),
        ));
    }

    let ba = &da[..da.len() - 2];
    let bb = &db[..db.len() - 2];
    let batch_rank = ba.len().max(bb.len());
    let mut out = Vec::with_capacity(batch_rank + 2);
    for i in 0..batch_rank {
        let x = aligned(ba, batch_rank, i);
        let y = aligned(bb, batch_rank, i);
        out.push(batch_dim(prim, x, y, &a.shape, &b.shape)?);
    }
    if !a_vector {
        out.push(m);
    }
    if !b_vector {
        out.push(n);
    }
    Ok(AbstractValue::Tensor(TensorSpec::new(a.dtype, Shape::Ranked(out))))
}

fn aligned(dims: &[Dim], rank: usize, i: usize) -> Dim {
    let offset = rank - dims.len();
    if i < offset {
        Dim::Known(1)
    } else {
        dims[i - offset]
    }
}

/// Bias is added along the channel axis: dim 1 for NCHW-like layouts, the
/// last dim when `data_format` ends in `C`.
pub fn infer_bias_add(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 2)?;
    let x = tensor_arg(prim, inputs, 0)?;
    let bias = tensor_arg(prim, inputs, 1)?;
    let dx = ranked_dims(prim, &x)?;
    let dbias = ranked_dims(prim, &bias)?;
    if dx.len() < 2 || dbias.len() != 1 {
        return Err(InferError::mismatch(
            &prim.name,
            format!("expected rank >= 2 input and 1-D bias, got {} and {}", x.shape, bias.shape),
        ));
    }
    let channel = bias_channel_axis(prim, dx.len());
    if !dims_agree(dx[channel], dbias[0]) {
        return Err(InferError::mismatch(
            &prim.name,
            format!("bias {} does not match channel dim of {}", bias.shape, x.shape),
        ));
    }
    Ok(AbstractValue::Tensor(x))
}

pub fn bias_channel_axis(prim: &Primitive, rank: usize) -> usize {
    match prim.str_attr("data_format") {
        Some(format) if format.ends_with('C') => rank - 1,
        _ => 1,
    }
}
