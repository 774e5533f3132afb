//! Output shape inference.

use crate::error::OpError;
use crate::ops::params::{ConvolutionParam, OpParams, PoolingParam};
use crate::ops::registry::{pooling_has_workspace, Op, OpKind};

/// Output extent of a strided, padded window sweep: `(x + 2p - k) / s + 1`.
///
/// Returns `None` when the window does not fit.
#[must_use]
pub fn conv_out_dim(x: usize, k: usize, p: usize, s: usize) -> Option<usize> {
    (x + 2 * p).checked_sub(k).map(|span| span / s + 1)
}

/// Output extent of a transposed convolution: `s * (x - 1) + k - 2p`.
///
/// Returns `None` when the result would not be positive.
#[must_use]
pub fn deconv_out_dim(x: usize, k: usize, p: usize, s: usize) -> Option<usize> {
    (s * x.checked_sub(1)? + k)
        .checked_sub(2 * p)
        .filter(|&d| d > 0)
}

fn mismatch(op: &Op, detail: impl Into<String>) -> OpError {
    OpError::ShapeMismatch {
        op: op.name,
        detail: detail.into(),
    }
}

fn expect_same(op: &Op, what: &str, a: &[usize], b: &[usize]) -> Result<(), OpError> {
    if a == b {
        Ok(())
    } else {
        Err(mismatch(op, format!("{what}: {a:?} vs {b:?}")))
    }
}

fn wrong_params(op: &Op) -> OpError {
    OpError::UnparsedAttributes(op.name)
}

pub(crate) fn infer(
    op: &Op,
    params: &OpParams,
    ins: &[&[usize]],
    outs: &[&[usize]],
) -> Result<Vec<Vec<usize>>, OpError> {
    match op.kind {
        OpKind::Copy | OpKind::BackwardCopy | OpKind::Activation => Ok(vec![ins[0].to_vec()]),
        OpKind::BackwardActivation | OpKind::ElemwiseAdd => {
            expect_same(op, "operands differ", ins[0], ins[1])?;
            Ok(vec![ins[0].to_vec()])
        }
        OpKind::BackwardAdd => Ok(vec![ins[0].to_vec(), ins[0].to_vec()]),
        OpKind::Concat => {
            let OpParams::Concat(p) = params else {
                return Err(wrong_params(op));
            };
            concat_shape(op, p.dim, ins).map(|s| vec![s])
        }
        OpKind::BackwardConcat => {
            let OpParams::Concat(p) = params else {
                return Err(wrong_params(op));
            };
            let joined = concat_shape(op, p.dim, outs)?;
            expect_same(op, "gradient does not cover the outputs", ins[0], &joined)?;
            Ok(outs.iter().map(|s| s.to_vec()).collect())
        }
        OpKind::Pooling => {
            let OpParams::Pooling(p) = params else {
                return Err(wrong_params(op));
            };
            let out = pool_shape(op, p, ins[0])?;
            if pooling_has_workspace(p) {
                Ok(vec![out.clone(), out])
            } else {
                Ok(vec![out])
            }
        }
        OpKind::BackwardPooling => {
            let OpParams::Pooling(p) = params else {
                return Err(wrong_params(op));
            };
            let (grad, data, out) = if pooling_has_workspace(p) {
                expect_same(op, "workspace", ins[4], ins[3])?;
                (ins[0], ins[2], ins[3])
            } else {
                (ins[0], ins[1], ins[2])
            };
            expect_same(op, "output gradient vs output", grad, out)?;
            expect_same(op, "pooled data", &pool_shape(op, p, data)?, out)?;
            Ok(vec![data.to_vec()])
        }
        OpKind::Lrn => {
            if ins[0].len() < 2 {
                return Err(mismatch(op, format!("needs a channel axis, got {:?}", ins[0])));
            }
            Ok(vec![ins[0].to_vec(), ins[0].to_vec()])
        }
        OpKind::BackwardLrn => {
            expect_same(op, "gradient vs data", ins[0], ins[1])?;
            expect_same(op, "norm vs data", ins[2], ins[1])?;
            Ok(vec![ins[1].to_vec()])
        }
        OpKind::FullyConnected => {
            let OpParams::FullyConnected(p) = params else {
                return Err(wrong_params(op));
            };
            let (k, mut out) = fc_split(op, p.flatten, ins[0])?;
            expect_same(op, "weight", ins[1], &[p.num_hidden, k])?;
            if !p.no_bias {
                expect_same(op, "bias", ins[2], &[p.num_hidden])?;
            }
            out.push(p.num_hidden);
            Ok(vec![out])
        }
        OpKind::BackwardFullyConnected => {
            let OpParams::FullyConnected(p) = params else {
                return Err(wrong_params(op));
            };
            let (k, mut out) = fc_split(op, p.flatten, ins[1])?;
            out.push(p.num_hidden);
            expect_same(op, "output gradient", ins[0], &out)?;
            expect_same(op, "weight", ins[2], &[p.num_hidden, k])?;
            let mut shapes = vec![ins[1].to_vec(), ins[2].to_vec()];
            if !p.no_bias {
                shapes.push(vec![p.num_hidden]);
            }
            Ok(shapes)
        }
        OpKind::Convolution => {
            let OpParams::Convolution(p) = params else {
                return Err(wrong_params(op));
            };
            conv_check_params(op, p, ins[0], ins[1], ins.get(2).copied())?;
            Ok(vec![conv_shape(op, p, ins[0])?])
        }
        OpKind::BackwardConvolution => {
            let OpParams::Convolution(p) = params else {
                return Err(wrong_params(op));
            };
            conv_check_params(op, p, ins[1], ins[2], ins.get(3).copied())?;
            expect_same(op, "output gradient", ins[0], &conv_shape(op, p, ins[1])?)?;
            Ok(ins[1..].iter().map(|s| s.to_vec()).collect())
        }
        OpKind::Deconvolution => {
            let OpParams::Deconvolution(p) = params else {
                return Err(wrong_params(op));
            };
            deconv_check_params(op, p, ins[0], ins[1], ins.get(2).copied())?;
            Ok(vec![deconv_shape(op, p, ins[0])?])
        }
        OpKind::BackwardDeconvolution => {
            let OpParams::Deconvolution(p) = params else {
                return Err(wrong_params(op));
            };
            deconv_check_params(op, p, ins[1], ins[2], ins.get(3).copied())?;
            expect_same(op, "output gradient", ins[0], &deconv_shape(op, p, ins[1])?)?;
            Ok(ins[1..].iter().map(|s| s.to_vec()).collect())
        }
    }
}

fn concat_shape(op: &Op, dim: usize, parts: &[&[usize]]) -> Result<Vec<usize>, OpError> {
    let first = parts[0];
    if dim >= first.len() {
        return Err(mismatch(op, format!("axis {dim} out of range for {first:?}")));
    }
    let mut out = first.to_vec();
    out[dim] = 0;
    for part in parts {
        let compatible = part.len() == first.len()
            && part
                .iter()
                .zip(first.iter())
                .enumerate()
                .all(|(axis, (a, b))| axis == dim || a == b);
        if !compatible {
            return Err(mismatch(op, format!("cannot join {part:?} with {first:?} on axis {dim}")));
        }
        out[dim] += part[dim];
    }
    Ok(out)
}

fn pool_shape(op: &Op, p: &PoolingParam, data: &[usize]) -> Result<Vec<usize>, OpError> {
    if p.global_pool {
        if !(3..=5).contains(&data.len()) {
            return Err(mismatch(op, format!("global pooling needs 1 to 3 spatial axes, got {data:?}")));
        }
        let mut out = data.to_vec();
        out[2..].fill(1);
        return Ok(out);
    }
    if data.len() != p.kernel.len() + 2 {
        return Err(mismatch(
            op,
            format!("a {}-d kernel needs rank {} data, got {data:?}", p.kernel.len(), p.kernel.len() + 2),
        ));
    }
    let mut out = data[..2].to_vec();
    for (i, &x) in data[2..].iter().enumerate() {
        let o = conv_out_dim(x, p.kernel[i], p.pad[i], p.stride[i])
            .ok_or_else(|| mismatch(op, format!("kernel larger than padded input {data:?}")))?;
        out.push(o);
    }
    Ok(out)
}

/// `(features, leading output dims)` of a fully connected input.
fn fc_split(op: &Op, flatten: bool, data: &[usize]) -> Result<(usize, Vec<usize>), OpError> {
    if data.len() < 2 {
        return Err(mismatch(op, format!("needs rank >= 2 data, got {data:?}")));
    }
    if flatten {
        let k = data[1..].iter().product();
        Ok((k, vec![data[0]]))
    } else {
        Ok((data[data.len() - 1], data[..data.len() - 1].to_vec()))
    }
}

fn conv_check_params(
    op: &Op,
    p: &ConvolutionParam,
    data: &[usize],
    weight: &[usize],
    bias: Option<&[usize]>,
) -> Result<(), OpError> {
    if data.len() != p.kernel.len() + 2 {
        return Err(mismatch(op, format!("a {}-d kernel needs rank {} data, got {data:?}", p.kernel.len(), p.kernel.len() + 2)));
    }
    let mut expected = vec![p.num_filter, data[1]];
    expected.extend_from_slice(&p.kernel);
    expect_same(op, "weight", weight, &expected)?;
    if !p.no_bias {
        let bias = bias.ok_or_else(|| mismatch(op, "bias input missing"))?;
        expect_same(op, "bias", bias, &[p.num_filter])?;
    }
    Ok(())
}

fn conv_shape(op: &Op, p: &ConvolutionParam, data: &[usize]) -> Result<Vec<usize>, OpError> {
    let mut out = vec![data[0], p.num_filter];
    for (i, &x) in data[2..].iter().enumerate() {
        let o = conv_out_dim(x, p.kernel[i], p.pad[i], p.stride[i])
            .ok_or_else(|| mismatch(op, format!("kernel larger than padded input {data:?}")))?;
        out.push(o);
    }
    Ok(out)
}

fn deconv_check_params(
    op: &Op,
    p: &ConvolutionParam,
    data: &[usize],
    weight: &[usize],
    bias: Option<&[usize]>,
) -> Result<(), OpError> {
    if data.len() != p.kernel.len() + 2 {
        return Err(mismatch(op, format!("a {}-d kernel needs rank {} data, got {data:?}", p.kernel.len(), p.kernel.len() + 2)));
    }
    let mut expected = vec![data[1], p.num_filter];
    expected.extend_from_slice(&p.kernel);
    expect_same(op, "weight", weight, &expected)?;
    if !p.no_bias {
        let bias = bias.ok_or_else(|| mismatch(op, "bias input missing"))?;
        expect_same(op, "bias", bias, &[p.num_filter])?;
    }
    Ok(())
}

fn deconv_shape(op: &Op, p: &ConvolutionParam, data: &[usize]) -> Result<Vec<usize>, OpError> {
    let mut out = vec![data[0], p.num_filter];
    for (i, &x) in data[2..].iter().enumerate() {
        let o = deconv_out_dim(x, p.kernel[i], p.pad[i], p.stride[i])
            .ok_or_else(|| mismatch(op, format!("padding consumes the whole output for {data:?}")))?;
        out.push(o);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::registry::NodeAttrs;

    #[test]
    fn window_arithmetic() {
        assert_eq!(conv_out_dim(6, 3, 1, 2), Some(3));
        assert_eq!(conv_out_dim(5, 1, 0, 1), Some(5));
        assert_eq!(conv_out_dim(1, 3, 0, 1), None);
        assert_eq!(deconv_out_dim(3, 2, 0, 2), Some(6));
        assert_eq!(deconv_out_dim(1, 1, 1, 1), None);
    }

    #[test]
    fn global_pooling_accepts_one_to_three_spatial_axes() {
        let mut attrs = NodeAttrs::new("Pooling").unwrap().with("global_pool", "true");
        let p = attrs.parse().unwrap().clone();
        let data: &[usize] = &[1, 2, 3, 4, 5];
        assert_eq!(attrs.op.infer_shape(&p, &[data], &[]).unwrap()[0], vec![1, 2, 1, 1, 1]);
        for bad in [&[1, 2][..], &[1, 1, 2, 2, 2, 2][..]] {
            assert!(matches!(
                attrs.op.infer_shape(&p, &[bad], &[]),
                Err(OpError::ShapeMismatch { .. })
            ));
        }
    }

    #[test]
    fn concat_sums_the_axis() {
        let mut attrs = NodeAttrs::new("concat").unwrap().with("num_args", 3).with("dim", 1);
        let p = attrs.parse().unwrap().clone();
        let s: &[usize] = &[2, 3, 4];
        assert_eq!(attrs.op.infer_shape(&p, &[s, s, s], &[]).unwrap(), vec![vec![2, 9, 4]]);
        let bad: &[usize] = &[2, 3, 5];
        assert!(attrs.op.infer_shape(&p, &[s, bad, s], &[]).is_err());
    }

    #[test]
    fn convolution_checks_weight_and_bias() {
        let mut attrs = NodeAttrs::new("Convolution")
            .unwrap()
            .with("kernel", "(3,3)")
            .with("num_filter", 4)
            .with("pad", "(1,1)");
        let p = attrs.parse().unwrap().clone();
        let data: &[usize] = &[2, 3, 8, 8];
        let weight: &[usize] = &[4, 3, 3, 3];
        let bias: &[usize] = &[4];
        assert_eq!(
            attrs.op.infer_shape(&p, &[data, weight, bias], &[]).unwrap(),
            vec![vec![2, 4, 8, 8]]
        );
        let bad_weight: &[usize] = &[4, 2, 3, 3];
        assert!(attrs.op.infer_shape(&p, &[data, bad_weight, bias], &[]).is_err());
    }

    #[test]
    fn max_pooling_in_2d_has_a_workspace() {
        let mut attrs = NodeAttrs::new("Pooling")
            .unwrap()
            .with("kernel", "(2,2)")
            .with("stride", "(2,2)")
            .with("pool_type", "max");
        let p = attrs.parse().unwrap().clone();
        let data: &[usize] = &[1, 2, 5, 5];
        assert_eq!(
            attrs.op.infer_shape(&p, &[data], &[]).unwrap(),
            vec![vec![1, 2, 2, 2], vec![1, 2, 2, 2]]
        );
    }
}
