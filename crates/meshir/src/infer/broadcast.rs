use crate::infer::InferError;
use crate::ir::{Dim, Shape};

/// Numpy-style broadcast of two shapes, aligned from the trailing dimension.
pub fn broadcast_shapes(op: &str, a: &Shape, b: &Shape) -> Result<Shape, InferError> {
    let (Some(da), Some(db)) = (a.dims(), b.dims()) else {
        return Ok(Shape::UnknownRank);
    };
    let rank = da.len().max(db.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let x = pick(da, rank, i);
        let y = pick(db, rank, i);
        let dim = match (x, y) {
            (Dim::Known(x), Dim::Known(y)) if x == y => Dim::Known(x),
            (Dim::Known(1), other) | (other, Dim::Known(1)) => other,
            (Dim::Known(x), Dim::Known(y)) => {
                return Err(InferError::mismatch(
                    op,
                    format!("cannot broadcast {a} with {b}: dimension {x} vs {y}"),
                ));
            }
            (Dim::Unknown, Dim::Known(v)) | (Dim::Known(v), Dim::Unknown) => Dim::Known(v),
            (Dim::Unknown, Dim::Unknown) => Dim::Unknown,
        };
        out.push(dim);
    }
    Ok(Shape::Ranked(out))
}

fn pick(dims: &[Dim], rank: usize, i: usize) -> Dim {
    let offset = rank - dims.len();
    if i < offset {
        Dim::Known(1)
    } else {
        dims[i - offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[2, 3], &[3], &[2, 3])]
    #[case(&[4, 1, 5], &[3, 1], &[4, 3, 5])]
    #[case(&[1], &[7, 2], &[7, 2])]
    #[case(&[], &[2, 2], &[2, 2])]
    fn broadcasts_static_shapes(#[case] a: &[i64], #[case] b: &[i64], #[case] out: &[i64]) {
        let got = broadcast_shapes("Add", &Shape::known(a), &Shape::known(b)).unwrap();
        assert_eq!(got, Shape::known(out));
    }

    #[test]
    fn mismatch_names_both_shapes() {
        let err = broadcast_shapes("Add", &Shape::known(&[2, 3]), &Shape::known(&[4])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("[2, 3]") && message.contains("[4]"), "{message}");
    }

    #[test]
    fn unknown_dims_follow_the_known_side() {
        let a = Shape::from_i64(&[-1, 3]).unwrap();
        let b = Shape::known(&[5, 1]);
        let got = broadcast_shapes("Mul", &a, &b).unwrap();
        assert_eq!(got, Shape::known(&[5, 3]));
        let c = Shape::from_i64(&[-1]).unwrap();
        assert_eq!(broadcast_shapes("Mul", &c, &c).unwrap(), c);
        assert_eq!(
            broadcast_shapes("Mul", &Shape::UnknownRank, &c).unwrap(),
            Shape::UnknownRank
        );
    }
}
