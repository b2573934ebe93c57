use crate::infer::InferError;
use crate::ir::prim::{ATTR_DILATION, ATTR_KERNEL_SIZE, ATTR_PAD, ATTR_PAD_MODE, ATTR_STRIDE};
use crate::ir::{Dim, Primitive, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    Pad,
    Same,
    Valid,
}

impl PadMode {
    /// Reads `pad_mode` as a case-insensitive name or its integer code
    /// (0 pad, 1 same, 2 valid). Missing means valid.
    pub fn from_primitive(prim: &Primitive) -> Result<Self, InferError> {
        match prim.attr(ATTR_PAD_MODE) {
            None => Ok(PadMode::Valid),
            Some(Value::Str(s)) => match s.to_ascii_lowercase().as_str() {
                "pad" => Ok(PadMode::Pad),
                "same" => Ok(PadMode::Same),
                "valid" => Ok(PadMode::Valid),
                other => Err(InferError::attr(
                    &prim.name,
                    ATTR_PAD_MODE,
                    format!("unknown pad mode '{other}'"),
                )),
            },
            Some(Value::Int(0)) => Ok(PadMode::Pad),
            Some(Value::Int(1)) => Ok(PadMode::Same),
            Some(Value::Int(2)) => Ok(PadMode::Valid),
            Some(other) => Err(InferError::attr(
                &prim.name,
                ATTR_PAD_MODE,
                format!("expected a pad mode, got {other}"),
            )),
        }
    }
}

/// Total padding a SAME convolution needs along one spatial axis.
pub fn pad_needed(out: i64, input: i64, kernel: i64, stride: i64, dilation: i64) -> i64 {
    ((out - 1) * stride + dilation * (kernel - 1) + 1 - input).max(0)
}

/// Head/tail split of the SAME padding; the tail takes the odd unit.
/// Unknown sizes yield unknown pads.
pub fn same_pad(out: Dim, input: Dim, kernel: i64, stride: i64, dilation: i64) -> (Dim, Dim) {
    match (out, input) {
        (Dim::Known(out), Dim::Known(input)) => {
            let needed = pad_needed(out, input, kernel, stride, dilation);
            let head = needed / 2;
            (Dim::Known(head), Dim::Known(needed - head))
        }
        _ => (Dim::Unknown, Dim::Unknown),
    }
}

/// Forward convolution output size along one spatial axis.
pub fn conv_output_dim(
    mode: PadMode,
    input: Dim,
    kernel: i64,
    stride: i64,
    dilation: i64,
    pads: (i64, i64),
) -> Dim {
    let Dim::Known(input) = input else {
        return Dim::Unknown;
    };
    let effective = dilation * (kernel - 1) + 1;
    let out = match mode {
        PadMode::Same => (input + stride - 1) / stride,
        PadMode::Valid => (input - effective) / stride + 1,
        PadMode::Pad => (input + pads.0 + pads.1 - effective) / stride + 1,
    };
    Dim::Known(out.max(0))
}

/// Normalized 3-D convolution window attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv3dWindow {
    pub mode: PadMode,
    pub kernel: [i64; 3],
    pub stride: [i64; 3],
    pub dilation: [i64; 3],
    pub pad: [i64; 6],
}

impl Conv3dWindow {
    /// `kernel_size` is an int or three ints; `stride` and `dilation` are an
    /// int, three spatial ints, or five NCDHW ints of which the last three are
    /// used; `pad` is an int or six ints.
    pub fn from_primitive(prim: &Primitive) -> Result<Self, InferError> {
        let mode = PadMode::from_primitive(prim)?;
        let kernel = spatial3(prim, ATTR_KERNEL_SIZE, None)?;
        let stride = spatial3(prim, ATTR_STRIDE, Some(1))?;
        let dilation = spatial3(prim, ATTR_DILATION, Some(1))?;
        let pad = match prim.int_list_attr(ATTR_PAD) {
            None => [0; 6],
            Some(v) if v.len() == 1 => [v[0]; 6],
            Some(v) if v.len() == 6 => [v[0], v[1], v[2], v[3], v[4], v[5]],
            Some(v) => {
                return Err(InferError::attr(
                    &prim.name,
                    ATTR_PAD,
                    format!("expected 1 or 6 values, got {v:?}"),
                ))
            }
        };
        if stride.iter().chain(dilation.iter()).any(|v| *v <= 0) {
            return Err(InferError::attr(
                &prim.name,
                ATTR_STRIDE,
                "stride and dilation must be positive",
            ));
        }
        Ok(Self {
            mode,
            kernel,
            stride,
            dilation,
            pad,
        })
    }

    /// Six-entry pad list `[head, tail, top, bottom, left, right]` for a
    /// backprop op whose forward output is `dout` and forward input is `x`
    /// (both NCDHW).
    pub fn pad_list(&self, dout: &[Dim], x: &[Dim]) -> Vec<Dim> {
        match self.mode {
            PadMode::Valid => vec![Dim::Known(0); 6],
            PadMode::Pad => self.pad.iter().map(|p| Dim::Known(*p)).collect(),
            PadMode::Same => {
                let mut pads = Vec::with_capacity(6);
                for axis in 0..3 {
                    let (head, tail) = same_pad(
                        dout[axis + 2],
                        x[axis + 2],
                        self.kernel[axis],
                        self.stride[axis],
                        self.dilation[axis],
                    );
                    pads.push(head);
                    pads.push(tail);
                }
                pads
            }
        }
    }
}

fn spatial3(prim: &Primitive, attr: &str, default: Option<i64>) -> Result<[i64; 3], InferError> {
    let values = match (prim.int_list_attr(attr), default) {
        (Some(values), _) => values,
        (None, Some(d)) => vec![d],
        (None, None) => {
            return Err(InferError::attr(&prim.name, attr, "attribute is required"));
        }
    };
    match values.len() {
        1 => Ok([values[0]; 3]),
        3 => Ok([values[0], values[1], values[2]]),
        5 => Ok([values[2], values[3], values[4]]),
        n => Err(InferError::attr(
            &prim.name,
            attr,
            format!("expected 1, 3 or 5 values, got {n}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(8, 16, 3, 2, 1)]
    #[case(5, 5, 3, 1, 1)]
    #[case(4, 9, 5, 3, 2)]
    #[case(1, 1, 1, 1, 1)]
    fn same_pad_splits_the_needed_total(
        #[case] out: i64,
        #[case] input: i64,
        #[case] kernel: i64,
        #[case] stride: i64,
        #[case] dilation: i64,
    ) {
        let needed = pad_needed(out, input, kernel, stride, dilation);
        let (head, tail) = same_pad(Dim::Known(out), Dim::Known(input), kernel, stride, dilation);
        let (head, tail) = (head.known().unwrap(), tail.known().unwrap());
        assert!(head >= 0 && tail >= 0);
        assert_eq!(head + tail, needed);
        assert!(tail == head || tail == head + 1);
    }

    #[test]
    fn unknown_output_leaves_pads_unknown() {
        let (head, tail) = same_pad(Dim::Unknown, Dim::Known(16), 3, 2, 1);
        assert!(head.is_unknown() && tail.is_unknown());
    }

    #[test]
    fn pad_needed_never_negative() {
        assert_eq!(pad_needed(1, 100, 3, 1, 1), 0);
    }
}
