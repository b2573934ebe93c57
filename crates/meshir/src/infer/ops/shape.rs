use crate::infer::{
    expect_inputs, int_list_arg, normalize_axis, ranked_dims, tensor_arg, InferError, InferInput,
    InferResult,
};
use crate::ir::prim::{ATTR_AXIS, ATTR_MULTIPLES, ATTR_PERM, ATTR_SHAPE};
use crate::ir::{AbstractValue, Dim, Primitive, Shape, TensorSpec};

fn tensor(spec: &TensorSpec, dims: Vec<Dim>) -> AbstractValue {
    AbstractValue::Tensor(TensorSpec::new(spec.dtype, Shape::Ranked(dims)))
}

/// Reshape with at most one `-1` entry resolved from the element count.
pub fn infer_reshape(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    let Some(target) = int_list_arg(prim, inputs, 1, ATTR_SHAPE) else {
        // Shape known only through its own abstract: rank is its length.
        let len = inputs
            .get(1)
            .and_then(|i| i.value.shape())
            .and_then(Shape::static_dims)
            .filter(|d| d.len() == 1);
        return match len {
            Some(len) => Ok(tensor(&x, vec![Dim::Unknown; len[0].max(0) as usize])),
            None => Err(InferError::undecided(&prim.name, "target shape is not a constant")),
        };
    };

    let inferred = target.iter().filter(|d| **d == -1).count();
    if inferred > 1 || target.iter().any(|d| *d < -1) {
        return Err(InferError::attr(
            &prim.name,
            ATTR_SHAPE,
            format!("invalid target shape {target:?}"),
        ));
    }
    let known: i64 = target.iter().filter(|d| **d >= 0).product();
    let total = x.shape.element_count();
    let mut out = Vec::with_capacity(target.len());
    for d in &target {
        if *d >= 0 {
            out.push(Dim::Known(*d));
            continue;
        }
        match total {
            Some(total) if known > 0 && total % known == 0 => out.push(Dim::Known(total / known)),
            Some(total) => {
                return Err(InferError::mismatch(
                    &prim.name,
                    format!("cannot reshape {} ({total} elements) into {target:?}", x.shape),
                ))
            }
            None => out.push(Dim::Unknown),
        }
    }
    if inferred == 0 {
        if let Some(total) = total {
            if total != known {
                return Err(InferError::mismatch(
                    &prim.name,
                    format!("cannot reshape {} ({total} elements) into {target:?}", x.shape),
                ));
            }
        }
    }
    Ok(tensor(&x, out))
}

pub fn infer_transpose(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    let dims = ranked_dims(prim, &x)?;
    let perm = int_list_arg(prim, inputs, 1, ATTR_PERM)
        .ok_or_else(|| InferError::undecided(&prim.name, "perm is not a constant"))?;
    if perm.len() != dims.len() {
        return Err(InferError::mismatch(
            &prim.name,
            format!("perm {perm:?} does not match input {}", x.shape),
        ));
    }
    let mut seen = vec![false; dims.len()];
    let mut out = Vec::with_capacity(dims.len());
    for p in &perm {
        let axis = normalize_axis(&prim.name, *p, dims.len())?;
        if std::mem::replace(&mut seen[axis], true) {
            return Err(InferError::attr(
                &prim.name,
                ATTR_PERM,
                format!("{perm:?} is not a permutation"),
            ));
        }
        out.push(dims[axis]);
    }
    Ok(tensor(&x, out))
}

pub fn infer_expand_dims(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    let dims = ranked_dims(prim, &x)?;
    let axis = int_list_arg(prim, inputs, 1, ATTR_AXIS)
        .and_then(|v| v.first().copied())
        .ok_or_else(|| InferError::undecided(&prim.name, "axis is not a constant"))?;
    let axis = normalize_axis(&prim.name, axis, dims.len() + 1)?;
    let mut out = dims.to_vec();
    out.insert(axis, Dim::Known(1));
    Ok(tensor(&x, out))
}

/// Axes removed by Squeeze; an empty list selects every size-1 dimension.
pub fn squeeze_axes(prim: &Primitive, dims: &[Dim]) -> Result<Vec<usize>, InferError> {
    let axes = prim.int_list_attr(ATTR_AXIS).unwrap_or_default();
    if axes.is_empty() {
        if dims.iter().any(|d| d.is_unknown()) {
            return Err(InferError::undecided(
                &prim.name,
                "cannot pick size-1 dims of a dynamic shape",
            ));
        }
        return Ok(dims
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == Dim::Known(1))
            .map(|(i, _)| i)
            .collect());
    }
    let mut out = Vec::with_capacity(axes.len());
    for axis in axes {
        let axis = normalize_axis(&prim.name, axis, dims.len())?;
        if let Dim::Known(size) = dims[axis] {
            if size != 1 {
                return Err(InferError::mismatch(
                    &prim.name,
                    format!("cannot squeeze axis {axis} of size {size}"),
                ));
            }
        }
        out.push(axis);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

pub fn infer_squeeze(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    let dims = ranked_dims(prim, &x)?;
    let axes = squeeze_axes(prim, dims)?;
    let out = dims
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, d)| *d)
        .collect();
    Ok(tensor(&x, out))
}

pub fn infer_tile(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    let x = tensor_arg(prim, inputs, 0)?;
    let dims = ranked_dims(prim, &x)?;
    let multiples = int_list_arg(prim, inputs, 1, ATTR_MULTIPLES)
        .ok_or_else(|| InferError::undecided(&prim.name, "multiples is not a constant"))?;
    if multiples.len() < dims.len() || multiples.iter().any(|m| *m <= 0) {
        return Err(InferError::attr(
            &prim.name,
            ATTR_MULTIPLES,
            format!("{multiples:?} does not cover input {}", x.shape),
        ));
    }
    let offset = multiples.len() - dims.len();
    let out = multiples
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let d = if i < offset { Dim::Known(1) } else { dims[i - offset] };
            match d {
                Dim::Known(v) => Dim::Known(v * m),
                Dim::Unknown => Dim::Unknown,
            }
        })
        .collect();
    Ok(tensor(&x, out))
}

/// Gather(params, indices, axis): the gathered axis is replaced by the
/// indices' shape.
pub fn infer_gather(prim: &Primitive, inputs: &[InferInput]) -> InferResult {
    expect_inputs(prim, inputs, 2)?;
    let params = tensor_arg(prim, inputs, 0)?;
    let indices = tensor_arg(prim, inputs, 1)?;
    if !indices.dtype.is_integer() {
        return Err(InferError::TypeMismatch {
            op: prim.name.clone(),
            input: "indices".to_string(),
            dtype: indices.dtype.to_string(),
        });
    }
    let pdims = ranked_dims(prim, &params)?;
    let idims = ranked_dims(prim, &indices)?;
    let axis = gather_axis(prim, inputs, pdims.len())?;
    let mut out = pdims[..axis].to_vec();
    out.extend_from_slice(idims);
    out.extend_from_slice(&pdims[axis + 1..]);
    Ok(tensor(&params, out))
}

pub fn gather_axis(prim: &Primitive, inputs: &[InferInput], rank: usize) -> Result<usize, InferError> {
    let axis = int_list_arg(prim, inputs, 2, ATTR_AXIS)
        .and_then(|v| v.first().copied())
        .unwrap_or(0);
    normalize_axis(&prim.name, axis, rank)
}
