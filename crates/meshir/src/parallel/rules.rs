//! Operator-specific strategy transforms.
//!
//! Each operator carries an [`OpLayout`] resolved once from its attributes
//! and literal inputs. Three transforms are defined over it:
//! [`output_strategy`] (inputs to output), [`from_input`] (one input to every
//! input) and [`from_output`] (output back to every input).

use std::collections::BTreeSet;

use crate::infer::ops::linalg::{bias_channel_axis, transpose_flags};
use crate::infer::ops::reduce::reduce_axes;
use crate::infer::ops::shape::{gather_axis, squeeze_axes};
use crate::infer::{int_list_arg, normalize_axis, InferInput, OpCategory};
use crate::ir::prim::{ATTR_AXIS, ATTR_KEEP_DIMS, ATTR_PERM};
use crate::ir::{Dim, Primitive, Shape};
use crate::parallel::op_info::OpInfo;
use crate::parallel::strategy::{align_right, batch_split, gcd, unsplit, Dimensions, Strategies};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpLayout {
    Elementwise,
    MatMul { transpose_a: bool, transpose_b: bool },
    BiasAdd { channel: usize },
    Reduce { axes: BTreeSet<usize>, keep_dims: bool },
    Reshape,
    Transpose { perm: Vec<usize> },
    ExpandDims { axis: usize },
    Squeeze { axes: Vec<usize> },
    Softmax { axes: Vec<usize> },
    Gather { axis: usize },
    /// Only the leading dimension of the first input may be split.
    Batch,
}

fn first_rank(args: &[InferInput]) -> Option<usize> {
    args.first().and_then(|a| a.value.rank())
}

/// Resolves the layout of a call; anything that cannot be decided falls back
/// to [`OpLayout::Batch`].
pub fn layout_of(prim: &Primitive, category: OpCategory, args: &[InferInput]) -> OpLayout {
    let rank = first_rank(args).unwrap_or(0);
    let resolved = match category {
        OpCategory::Elementwise => Some(OpLayout::Elementwise),
        OpCategory::MatMul => {
            let (transpose_a, transpose_b) = transpose_flags(prim);
            Some(OpLayout::MatMul {
                transpose_a,
                transpose_b,
            })
        }
        OpCategory::BiasAdd => Some(OpLayout::BiasAdd {
            channel: bias_channel_axis(prim, rank),
        }),
        OpCategory::Reduce => {
            let keep_dims = prim.bool_attr(ATTR_KEEP_DIMS).unwrap_or(false);
            let axes = match int_list_arg(prim, args, 1, ATTR_AXIS) {
                Some(axes) => Some(axes),
                None if args.len() < 2 => Some(Vec::new()),
                None => None,
            };
            axes.and_then(|axes| reduce_axes(&prim.name, &axes, rank).ok())
                .map(|axes| OpLayout::Reduce { axes, keep_dims })
        }
        OpCategory::Reshape => Some(OpLayout::Reshape),
        OpCategory::Transpose => int_list_arg(prim, args, 1, ATTR_PERM).and_then(|perm| {
            perm.iter()
                .map(|p| normalize_axis(&prim.name, *p, rank).ok())
                .collect::<Option<Vec<_>>>()
                .filter(|perm| perm.len() == rank)
                .map(|perm| OpLayout::Transpose { perm })
        }),
        OpCategory::ExpandDims => int_list_arg(prim, args, 1, ATTR_AXIS)
            .and_then(|v| v.first().copied())
            .and_then(|axis| normalize_axis(&prim.name, axis, rank + 1).ok())
            .map(|axis| OpLayout::ExpandDims { axis }),
        OpCategory::Squeeze => args
            .first()
            .and_then(|a| a.value.shape())
            .and_then(Shape::dims)
            .and_then(|dims| squeeze_axes(prim, dims).ok())
            .map(|axes| OpLayout::Squeeze { axes }),
        OpCategory::Softmax => prim
            .int_list_attr(ATTR_AXIS)
            .unwrap_or_else(|| vec![-1])
            .iter()
            .map(|axis| normalize_axis(&prim.name, *axis, rank).ok())
            .collect::<Option<Vec<_>>>()
            .map(|axes| OpLayout::Softmax { axes }),
        OpCategory::Gather => gather_axis(prim, args, rank)
            .ok()
            .map(|axis| OpLayout::Gather { axis }),
        _ => None,
    };
    resolved.unwrap_or(OpLayout::Batch)
}

/// Per-axis maximum of right-aligned strategies.
fn merge_aligned<'a>(parts: impl IntoIterator<Item = &'a [i64]>, rank: usize) -> Dimensions {
    let mut out = unsplit(rank);
    for part in parts {
        for (o, p) in out.iter_mut().zip(align_right(part, rank)) {
            *o = (*o).max(p);
        }
    }
    out
}

/// Output-aligned strategy restricted to input `input`: broadcast axes (size
/// 1 in the input) are never split.
fn broadcast_to_input(op: &OpInfo, input: usize, out: &[i64]) -> Dimensions {
    let rank = op.input_rank(input);
    let mut dims = align_right(out, rank);
    if let Some(shape) = op.inputs.get(input).and_then(|i| i.shape.dims()) {
        for (d, size) in dims.iter_mut().zip(shape) {
            if *size == Dim::Known(1) {
                *d = 1;
            }
        }
    }
    dims
}

struct MatMulAxes {
    r1: usize,
    r2: usize,
    m: Option<usize>,
    k1: usize,
    k2: usize,
    n: Option<usize>,
}

impl MatMulAxes {
    fn new(op: &OpInfo, transpose_a: bool, transpose_b: bool) -> Self {
        let (r1, r2) = (op.input_rank(0), op.input_rank(1));
        let (m, k1) = if r1 >= 2 {
            if transpose_a {
                (Some(r1 - 1), r1 - 2)
            } else {
                (Some(r1 - 2), r1 - 1)
            }
        } else {
            (None, 0)
        };
        let (k2, n) = if r2 >= 2 {
            if transpose_b {
                (r2 - 1, Some(r2 - 2))
            } else {
                (r2 - 2, Some(r2 - 1))
            }
        } else {
            (0, None)
        };
        Self { r1, r2, m, k1, k2, n }
    }

    fn batch1(&self) -> usize {
        self.r1.saturating_sub(2)
    }

    fn batch2(&self) -> usize {
        self.r2.saturating_sub(2)
    }

    /// Right-aligned batch axes present in both operands, `(x1 axis, x2 axis)`.
    fn batch_pairs(&self) -> impl Iterator<Item = (usize, usize)> {
        let (b1, b2) = (self.batch1(), self.batch2());
        (0..b1.min(b2)).map(move |i| (b1 - 1 - i, b2 - 1 - i))
    }
}

fn is_broadcast_axis(op: &OpInfo, input: usize, axis: usize) -> bool {
    op.inputs
        .get(input)
        .and_then(|i| i.shape.dims())
        .and_then(|dims| dims.get(axis))
        == Some(&Dim::Known(1))
}

fn get(dims: &[i64], axis: usize) -> i64 {
    dims.get(axis).copied().unwrap_or(1)
}

/// Maps a strategy between the two sides of a reshape. Axes that survive the
/// reshape unchanged keep their split; the rest are unsplit.
fn map_reshape(from: &Shape, to: &Shape, dims: &[i64]) -> Dimensions {
    let rank = to.rank().unwrap_or(0);
    let mut out = unsplit(rank);
    match (from.static_dims(), to.static_dims()) {
        (Some(a), Some(b)) => {
            let prefix = |s: &[i64]| -> Vec<i64> {
                let mut acc = 1;
                s.iter()
                    .map(|d| {
                        let before = acc;
                        acc *= d;
                        before
                    })
                    .collect()
            };
            let (pa, pb) = (prefix(&a), prefix(&b));
            for j in 0..b.len() {
                if let Some(i) = (0..a.len()).find(|&i| pa[i] == pb[j] && a[i] == b[j]) {
                    out[j] = get(dims, i);
                }
            }
        }
        _ => {
            let lead = |s: &Shape| s.dims().and_then(|d| d.first().copied());
            if rank > 0 && lead(from).is_some() && lead(from) == lead(to) {
                out[0] = get(dims, 0);
            }
        }
    }
    out
}

/// Strategy of the output tensor given the operator's input strategies.
pub fn output_strategy(op: &OpInfo, s: &Strategies) -> Dimensions {
    let out_rank = op.output_rank();
    let first: &[i64] = s.first().map(Vec::as_slice).unwrap_or(&[]);
    match &op.layout {
        OpLayout::Elementwise => merge_aligned(s.iter().map(Vec::as_slice), out_rank),
        OpLayout::MatMul {
            transpose_a,
            transpose_b,
        } => {
            let axes = MatMulAxes::new(op, *transpose_a, *transpose_b);
            let x2: &[i64] = s.get(1).map(Vec::as_slice).unwrap_or(&[]);
            let tail = usize::from(axes.m.is_some()) + usize::from(axes.n.is_some());
            let batch_rank = out_rank.saturating_sub(tail);
            let mut out = merge_aligned(
                [&first[..axes.batch1().min(first.len())], &x2[..axes.batch2().min(x2.len())]],
                batch_rank,
            );
            if let Some(m) = axes.m {
                out.push(get(first, m));
            }
            if let Some(n) = axes.n {
                out.push(get(x2, n));
            }
            align_right(&out, out_rank)
        }
        OpLayout::BiasAdd { .. } => first.to_vec(),
        OpLayout::Reduce { axes, keep_dims } => first
            .iter()
            .enumerate()
            .filter_map(|(i, d)| match (axes.contains(&i), keep_dims) {
                (true, true) => Some(1),
                (true, false) => None,
                (false, _) => Some(*d),
            })
            .collect(),
        OpLayout::Reshape => match op.inputs.first() {
            Some(input) => map_reshape(&input.shape, &op.output, first),
            None => unsplit(out_rank),
        },
        OpLayout::Transpose { perm } => perm.iter().map(|p| get(first, *p)).collect(),
        OpLayout::ExpandDims { axis } => {
            let mut out = first.to_vec();
            out.insert((*axis).min(out.len()), 1);
            out
        }
        OpLayout::Squeeze { axes } => first
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, d)| *d)
            .collect(),
        OpLayout::Softmax { axes } => {
            let mut out = first.to_vec();
            for axis in axes {
                if let Some(d) = out.get_mut(*axis) {
                    *d = 1;
                }
            }
            out
        }
        OpLayout::Gather { axis } => {
            let indices: &[i64] = s.get(1).map(Vec::as_slice).unwrap_or(&[]);
            let axis = (*axis).min(first.len());
            let mut out = first[..axis].to_vec();
            out.extend_from_slice(indices);
            if axis < first.len() {
                out.extend_from_slice(&first[axis + 1..]);
            }
            align_right(&out, out_rank)
        }
        OpLayout::Batch => batch_split(out_rank, first.first().copied().unwrap_or(1)),
    }
}

/// Every input strategy of `op` derived from the strategy `dims` of input
/// `input` (typically the output strategy of its producer).
pub fn from_input(op: &OpInfo, input: usize, dims: &[i64]) -> Strategies {
    let count = op.inputs.len();
    let rank = |i: usize| op.input_rank(i);
    match &op.layout {
        OpLayout::Elementwise => {
            let out = merge_aligned([dims], op.output_rank());
            (0..count).map(|i| broadcast_to_input(op, i, &out)).collect()
        }
        OpLayout::MatMul {
            transpose_a,
            transpose_b,
        } => {
            let axes = MatMulAxes::new(op, *transpose_a, *transpose_b);
            let mut x1 = unsplit(axes.r1);
            let mut x2 = unsplit(axes.r2);
            let (b1, b2) = (axes.batch1(), axes.batch2());
            if input == 0 {
                x1 = align_right(dims, axes.r1);
                if let Some(k) = x2.get_mut(axes.k2) {
                    *k = get(&x1, axes.k1);
                }
                let batch = align_right(&x1[..b1], b2);
                x2[..b2].copy_from_slice(&batch);
            } else {
                x2 = align_right(dims, axes.r2);
                if let Some(k) = x1.get_mut(axes.k1) {
                    *k = get(&x2, axes.k2);
                }
                let batch = align_right(&x2[..b2], b1);
                x1[..b1].copy_from_slice(&batch);
            }
            let mut out = vec![x1, x2];
            for (i, dims) in out.iter_mut().enumerate() {
                *dims = broadcast_batch(op, i, dims);
            }
            out.truncate(count);
            out
        }
        OpLayout::BiasAdd { channel } => {
            let x = if input == 0 {
                align_right(dims, rank(0))
            } else {
                let mut x = unsplit(rank(0));
                if let Some(c) = x.get_mut(*channel) {
                    *c = get(dims, 0);
                }
                x
            };
            let bias = vec![get(&x, *channel)];
            let mut out = vec![x, bias];
            out.truncate(count);
            out
        }
        OpLayout::Softmax { axes } => {
            let mut x = align_right(dims, rank(0));
            for axis in axes {
                if let Some(d) = x.get_mut(*axis) {
                    *d = 1;
                }
            }
            vec![x]
        }
        OpLayout::Gather { axis } => {
            let (mut params, mut indices) = (unsplit(rank(0)), unsplit(rank(1)));
            if input == 0 {
                params = align_right(dims, rank(0));
                if let Some(d) = params.get_mut(*axis) {
                    *d = 1;
                }
            } else {
                indices = align_right(dims, rank(1));
            }
            let mut out = vec![params, indices];
            out.truncate(count);
            out
        }
        OpLayout::Batch => {
            let lead = if input == 0 { get(dims, 0) } else { 1 };
            (0..count)
                .map(|i| {
                    if i == 0 {
                        batch_split(rank(0), lead)
                    } else {
                        unsplit(rank(i))
                    }
                })
                .collect()
        }
        OpLayout::Reduce { .. }
        | OpLayout::Reshape
        | OpLayout::Transpose { .. }
        | OpLayout::ExpandDims { .. }
        | OpLayout::Squeeze { .. } => {
            let mut x = align_right(dims, rank(0));
            if let OpLayout::Squeeze { axes } = &op.layout {
                for axis in axes {
                    if let Some(d) = x.get_mut(*axis) {
                        *d = 1;
                    }
                }
            }
            vec![x]
        }
    }
}

/// Axes split jointly by two inputs: `((input, axis), (input, axis))`. Their
/// splits must be equal for the layout to be realisable.
fn shared_axes(op: &OpInfo) -> Vec<((usize, usize), (usize, usize))> {
    if op.inputs.len() < 2 {
        return Vec::new();
    }
    match &op.layout {
        OpLayout::MatMul {
            transpose_a,
            transpose_b,
        } => {
            let axes = MatMulAxes::new(op, *transpose_a, *transpose_b);
            let mut pairs = vec![((0, axes.k1), (1, axes.k2))];
            pairs.extend(
                axes.batch_pairs()
                    .filter(|(a1, a2)| !is_broadcast_axis(op, 0, *a1) && !is_broadcast_axis(op, 1, *a2))
                    .map(|(a1, a2)| ((0, a1), (1, a2))),
            );
            pairs
        }
        OpLayout::BiasAdd { channel } => vec![((0, *channel), (1, 0))],
        _ => Vec::new(),
    }
}

/// Checks that axes split jointly by two inputs carry the same split: the
/// contraction and batch axes of a matmul, the channel of a bias add.
pub fn check_consistent(op: &OpInfo, s: &Strategies) -> Result<(), String> {
    for ((i1, a1), (i2, a2)) in shared_axes(op) {
        let (Some(x), Some(y)) = (s.get(i1), s.get(i2)) else {
            continue;
        };
        let (d1, d2) = (get(x, a1), get(y, a2));
        if d1 != d2 {
            return Err(format!(
                "input {i1} axis {a1} is split {d1} ways but input {i2} axis {a2} is split {d2} ways"
            ));
        }
    }
    Ok(())
}

/// Brings jointly split axes back into agreement after each input was clamped
/// on its own. Both sides take the gcd of their splits, which still divides
/// the axis and the device budget.
pub fn reconcile(op: &OpInfo, s: &mut Strategies) {
    for ((i1, a1), (i2, a2)) in shared_axes(op) {
        let (Some(d1), Some(d2)) = (
            s.get(i1).and_then(|x| x.get(a1)).copied(),
            s.get(i2).and_then(|y| y.get(a2)).copied(),
        ) else {
            continue;
        };
        let joint = gcd(d1, d2).max(1);
        for (input, axis) in [(i1, a1), (i2, a2)] {
            if let Some(d) = s.get_mut(input).and_then(|x| x.get_mut(axis)) {
                *d = joint;
            }
        }
    }
}

/// Batch axes of a matmul operand that are broadcast (size 1) stay unsplit.
fn broadcast_batch(op: &OpInfo, input: usize, dims: &[i64]) -> Dimensions {
    let mut out = dims.to_vec();
    let batch = op.input_rank(input).saturating_sub(2);
    if let Some(shape) = op.inputs.get(input).and_then(|i| i.shape.dims()) {
        for (d, size) in out.iter_mut().zip(shape).take(batch) {
            if *size == Dim::Known(1) {
                *d = 1;
            }
        }
    }
    out
}

/// Every input strategy of `op` derived from a strategy of its output.
pub fn from_output(op: &OpInfo, out: &[i64]) -> Strategies {
    let count = op.inputs.len();
    let out_rank = op.output_rank();
    let out = align_right(out, out_rank);
    let rank = |i: usize| op.input_rank(i);
    let strategies = match &op.layout {
        OpLayout::Elementwise => (0..count).map(|i| broadcast_to_input(op, i, &out)).collect(),
        OpLayout::MatMul {
            transpose_a,
            transpose_b,
        } => {
            let axes = MatMulAxes::new(op, *transpose_a, *transpose_b);
            let tail = usize::from(axes.m.is_some()) + usize::from(axes.n.is_some());
            let batch = &out[..out_rank.saturating_sub(tail)];
            let mut x1 = unsplit(axes.r1);
            let mut x2 = unsplit(axes.r2);
            let (b1, b2) = (axes.batch1(), axes.batch2());
            x1[..b1].copy_from_slice(&align_right(batch, b1));
            x2[..b2].copy_from_slice(&align_right(batch, b2));
            let mut pos = batch.len();
            if let Some(m) = axes.m {
                x1[m] = get(&out, pos);
                pos += 1;
            }
            if let Some(n) = axes.n {
                x2[n] = get(&out, pos);
            }
            vec![broadcast_batch(op, 0, &x1), broadcast_batch(op, 1, &x2)]
        }
        OpLayout::BiasAdd { channel } => vec![out.clone(), vec![get(&out, *channel)]],
        OpLayout::Reduce { axes, keep_dims } => {
            let mut x = Vec::with_capacity(rank(0));
            let mut pos = 0;
            for i in 0..rank(0) {
                if axes.contains(&i) {
                    x.push(1);
                    if *keep_dims {
                        pos += 1;
                    }
                } else {
                    x.push(get(&out, pos));
                    pos += 1;
                }
            }
            vec![x]
        }
        OpLayout::Reshape => match op.inputs.first() {
            Some(input) => vec![map_reshape(&op.output, &input.shape, &out)],
            None => Vec::new(),
        },
        OpLayout::Transpose { perm } => {
            let mut x = unsplit(rank(0));
            for (i, p) in perm.iter().enumerate() {
                if let Some(d) = x.get_mut(*p) {
                    *d = get(&out, i);
                }
            }
            vec![x]
        }
        OpLayout::ExpandDims { axis } => {
            let mut x = out.clone();
            if *axis < x.len() {
                x.remove(*axis);
            }
            vec![x]
        }
        OpLayout::Squeeze { axes } => {
            let mut x = Vec::with_capacity(rank(0));
            let mut pos = 0;
            for i in 0..rank(0) {
                if axes.contains(&i) {
                    x.push(1);
                } else {
                    x.push(get(&out, pos));
                    pos += 1;
                }
            }
            vec![x]
        }
        OpLayout::Softmax { axes } => {
            let mut x = out.clone();
            for axis in axes {
                if let Some(d) = x.get_mut(*axis) {
                    *d = 1;
                }
            }
            vec![x]
        }
        OpLayout::Gather { axis } => {
            let ri = rank(1);
            let mut params = out[..(*axis).min(out.len())].to_vec();
            params.push(1);
            if axis + ri < out.len() {
                params.extend_from_slice(&out[axis + ri..]);
            }
            let indices = out
                .get(*axis..(axis + ri).min(out.len()))
                .map(<[i64]>::to_vec)
                .unwrap_or_else(|| unsplit(ri));
            vec![align_right(&params, rank(0)), align_right(&indices, ri)]
        }
        OpLayout::Batch => (0..count)
            .map(|i| {
                if i == 0 {
                    batch_split(rank(0), get(&out, 0))
                } else {
                    unsplit(rank(i))
                }
            })
            .collect(),
    };
    let mut strategies: Strategies = strategies;
    strategies.truncate(count);
    while strategies.len() < count {
        strategies.push(unsplit(rank(strategies.len())));
    }
    strategies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{NodeId, Primitive};
    use crate::parallel::op_info::{InputSource, TensorInput};

    fn op(layout: OpLayout, inputs: &[&[i64]], output: &[i64]) -> OpInfo {
        OpInfo {
            node: NodeId(0),
            name: "op".into(),
            prim: Primitive::new("Op"),
            category: OpCategory::Other,
            inputs: inputs
                .iter()
                .enumerate()
                .map(|(slot, dims)| TensorInput {
                    slot,
                    shape: Shape::known(dims),
                    source: InputSource::External(NodeId(0)),
                })
                .collect(),
            output: Shape::known(output),
            eliminated: false,
            layout,
        }
    }

    #[test]
    fn matmul_output_takes_rows_from_lhs_and_columns_from_rhs() {
        let mm = op(
            OpLayout::MatMul {
                transpose_a: false,
                transpose_b: false,
            },
            &[&[8, 16], &[16, 32]],
            &[8, 32],
        );
        assert_eq!(output_strategy(&mm, &vec![vec![4, 2], vec![2, 2]]), vec![4, 2]);
        assert_eq!(from_input(&mm, 0, &[4, 2]), vec![vec![4, 2], vec![2, 1]]);
        assert_eq!(from_output(&mm, &[4, 1]), vec![vec![4, 1], vec![1, 1]]);
    }

    #[test]
    fn matmul_contraction_splits_must_agree() {
        let mm = op(
            OpLayout::MatMul {
                transpose_a: false,
                transpose_b: true,
            },
            &[&[8, 16], &[32, 16]],
            &[8, 32],
        );
        assert!(check_consistent(&mm, &vec![vec![2, 4], vec![1, 4]]).is_ok());
        assert!(check_consistent(&mm, &vec![vec![1, 4], vec![1, 1]]).is_err());

        let mut clamped = vec![vec![8, 1], vec![1, 8]];
        reconcile(&mm, &mut clamped);
        assert_eq!(clamped, vec![vec![8, 1], vec![1, 1]]);
    }

    #[test]
    fn batch_matmul_broadcast_batch_is_not_shared() {
        let bmm = op(
            OpLayout::MatMul {
                transpose_a: false,
                transpose_b: false,
            },
            &[&[4, 8, 16], &[1, 16, 32]],
            &[4, 8, 32],
        );
        assert!(check_consistent(&bmm, &vec![vec![4, 1, 2], vec![1, 2, 1]]).is_ok());
        assert!(check_consistent(&bmm, &vec![vec![4, 1, 2], vec![1, 1, 1]]).is_err());
    }

    #[test]
    fn reduce_drops_or_keeps_reduced_axes() {
        let axes: BTreeSet<usize> = [1].into_iter().collect();
        let drop = op(
            OpLayout::Reduce {
                axes: axes.clone(),
                keep_dims: false,
            },
            &[&[8, 4, 2]],
            &[8, 2],
        );
        assert_eq!(output_strategy(&drop, &vec![vec![2, 2, 1]]), vec![2, 1]);
        assert_eq!(from_output(&drop, &[2, 1]), vec![vec![2, 1, 1]]);

        let keep = op(OpLayout::Reduce { axes, keep_dims: true }, &[&[8, 4, 2]], &[8, 1, 2]);
        assert_eq!(output_strategy(&keep, &vec![vec![2, 2, 1]]), vec![2, 1, 1]);
        assert_eq!(from_output(&keep, &[2, 1, 2]), vec![vec![2, 1, 2]]);
    }

    #[test]
    fn transpose_and_expand_dims_remap_indices() {
        let t = op(OpLayout::Transpose { perm: vec![2, 0, 1] }, &[&[2, 4, 8]], &[8, 2, 4]);
        assert_eq!(output_strategy(&t, &vec![vec![2, 4, 1]]), vec![1, 2, 4]);
        assert_eq!(from_output(&t, &[1, 2, 4]), vec![vec![2, 4, 1]]);

        let e = op(OpLayout::ExpandDims { axis: 1 }, &[&[8, 4]], &[8, 1, 4]);
        assert_eq!(output_strategy(&e, &vec![vec![2, 2]]), vec![2, 1, 2]);
        assert_eq!(from_output(&e, &[2, 1, 2]), vec![vec![2, 2]]);
    }

    #[test]
    fn reshape_keeps_splits_of_preserved_axes() {
        let r = op(OpLayout::Reshape, &[&[8, 4, 6]], &[8, 24]);
        assert_eq!(output_strategy(&r, &vec![vec![4, 2, 1]]), vec![4, 1]);
        assert_eq!(from_output(&r, &[4, 1]), vec![vec![4, 1, 1]]);
    }

    #[test]
    fn elementwise_broadcast_axes_stay_unsplit() {
        let add = op(OpLayout::Elementwise, &[&[8, 4], &[1, 4]], &[8, 4]);
        assert_eq!(from_input(&add, 0, &[4, 2]), vec![vec![4, 2], vec![1, 2]]);
    }
}
