//! Sharding strategy values and their arithmetic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::{Dim, Shape};

/// Split factor per tensor dimension.
pub type Dimensions = Vec<i64>;

/// One [`Dimensions`] per tensor input of an operator.
pub type Strategies = Vec<Dimensions>;

pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Unsplit strategy of the given rank.
pub fn unsplit(rank: usize) -> Dimensions {
    vec![1; rank]
}

/// Splits only the leading dimension by `devices`.
pub fn batch_split(rank: usize, devices: i64) -> Dimensions {
    let mut dims = unsplit(rank);
    if let Some(first) = dims.first_mut() {
        *first = devices;
    }
    dims
}

/// Pads or trims `dims` on the left to `rank`, the way numpy aligns shapes.
pub fn align_right(dims: &[i64], rank: usize) -> Dimensions {
    if dims.len() >= rank {
        dims[dims.len() - rank..].to_vec()
    } else {
        let mut out = unsplit(rank - dims.len());
        out.extend_from_slice(dims);
        out
    }
}

/// Clamps each split so it divides the known dimension size and the product
/// over all dimensions divides `devices`. Unknown dimensions only see the
/// device budget.
pub fn fit_to(dims: &mut Dimensions, shape: &Shape, devices: i64) {
    let mut budget = devices.max(1);
    let sizes = shape.dims().unwrap_or(&[]);
    for (axis, split) in dims.iter_mut().enumerate() {
        let mut fitted = gcd((*split).max(1), budget);
        if let Some(Dim::Known(size)) = sizes.get(axis) {
            fitted = gcd(fitted, (*size).max(1));
        }
        *split = fitted.max(1);
        budget /= *split;
    }
}

pub fn device_product(dims: &[i64]) -> i64 {
    dims.iter().product()
}

/// Display helper, `[[2, 1], [1, 1]]`.
pub struct DisplayStrategies<'a>(pub &'a [Dimensions]);

impl fmt::Display for DisplayStrategies<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dims) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dims:?}")?;
        }
        write!(f, "]")
    }
}

/// How the propagator treats an operator that is not an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelRole {
    /// Runs unsplit on every device.
    Standalone,
    /// Every input is split along its leading dimension.
    BatchParallel,
    /// Folded away upstream; filled from its neighbours for bookkeeping.
    Eliminated,
}

/// A candidate strategy with its estimated cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyCandidate {
    pub strategies: Strategies,
    pub cost: f64,
}
