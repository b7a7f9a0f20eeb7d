//! Matrix product and batched matrix inverse.

use super::{array_at, Input, Op, Params};
use crate::array::{matmul_raw, transpose_raw, NdArray};
use crate::error::{GraphError, Result};

pub(super) fn validate_matmul(inputs: &[Input<'_>]) -> Result<()> {
    let a = array_at(Op::MatMul, inputs, 0)?;
    let b = array_at(Op::MatMul, inputs, 1)?;
    if a.ndim() != 2 || b.ndim() != 2 {
        return Err(GraphError::invalid_shape(
            "matmul",
            format!("only 2-D matrices are supported, got {} and {}", a.shape(), b.shape()),
        ));
    }
    if a.shape().dim(1) != b.shape().dim(0) {
        return Err(GraphError::ShapeMismatch {
            op: "matmul",
            lhs: a.shape().clone(),
            rhs: b.shape().clone(),
        });
    }
    Ok(())
}

pub(super) fn evaluate_matmul(inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let a = array_at(Op::MatMul, inputs, 0)?;
    let b = array_at(Op::MatMul, inputs, 1)?;
    Ok((a.matmul(b)?, Params::None))
}

pub(super) fn gradient_matmul(upstream: &NdArray, inputs: &[Input<'_>]) -> Result<Vec<Option<NdArray>>> {
    // C = A @ B: dA = G @ B^T, dB = A^T @ G
    let a = array_at(Op::MatMul, inputs, 0)?;
    let b = array_at(Op::MatMul, inputs, 1)?;
    let grad_a = upstream.matmul(&b.transpose())?;
    let grad_b = a.transpose().matmul(upstream)?;
    Ok(vec![Some(grad_a), Some(grad_b)])
}

pub(super) fn tangent_matmul(
    inputs: &[Input<'_>],
    tangents: &[Option<&NdArray>],
) -> Result<Option<NdArray>> {
    let a = array_at(Op::MatMul, inputs, 0)?;
    let b = array_at(Op::MatMul, inputs, 1)?;
    let left = tangents[0].map(|da| da.matmul(b)).transpose()?;
    let right = tangents[1].map(|db| a.matmul(db)).transpose()?;
    Ok(match (left, right) {
        (Some(l), Some(r)) => Some(l.add(&r)?),
        (l, r) => l.or(r),
    })
}

pub(super) fn validate_inv(inputs: &[Input<'_>]) -> Result<()> {
    array_at(Op::Inv, inputs, 0)?.square_batch("inv").map(|_| ())
}

pub(super) fn evaluate_inv(inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let inv = array_at(Op::Inv, inputs, 0)?.inverse()?;
    Ok((inv.clone(), Params::Array(inv)))
}

fn cached_inverse(params: &Params) -> Result<&NdArray> {
    match params {
        Params::Array(inv) => Ok(inv),
        _ => Err(GraphError::type_error("inv: missing cached inverse")),
    }
}

/// Apply `f(lhs_block, rhs_block, n)` to every `n x n` block of two equal-shaped batches.
fn per_block(
    lhs: &NdArray,
    rhs: &NdArray,
    f: impl Fn(&[f64], &[f64], usize) -> Vec<f64>,
) -> Result<NdArray> {
    lhs.expect_same_shape(rhs, "inv")?;
    let (batch, n) = lhs.square_batch("inv")?;
    let (l, r) = (lhs.as_slice(), rhs.as_slice());
    let mut data = Vec::with_capacity(lhs.numel());
    for b in 0..batch {
        let range = b * n * n..(b + 1) * n * n;
        data.extend(f(&l[range.clone()], &r[range], n));
    }
    NdArray::with_dtype(lhs.shape().clone(), data, lhs.dtype().promote(rhs.dtype()))
}

pub(super) fn gradient_inv(upstream: &NdArray, params: &Params) -> Result<Vec<Option<NdArray>>> {
    // Y = A^-1: dA = -Y^T @ G @ Y^T
    let inv = cached_inverse(params)?;
    let grad = per_block(inv, upstream, |y, g, n| {
        let yt = transpose_raw(y, n, n);
        let left = matmul_raw(&yt, g, n, n, n);
        matmul_raw(&left, &yt, n, n, n).into_iter().map(|v| -v).collect()
    })?;
    Ok(vec![Some(grad)])
}

pub(super) fn tangent_inv(tangents: &[Option<&NdArray>], params: &Params) -> Result<Option<NdArray>> {
    // dY = -Y @ dA @ Y
    let inv = cached_inverse(params)?;
    tangents[0]
        .map(|t| {
            per_block(inv, t, |y, da, n| {
                let left = matmul_raw(y, da, n, n, n);
                matmul_raw(&left, y, n, n, n).into_iter().map(|v| -v).collect()
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;
    use approx::assert_relative_eq;

    #[test]
    fn test_matmul_rejects_vectors() {
        let v = NdArray::from_vec(vec![1.0, 2.0]);
        let m = NdArray::zeros([2, 2], DType::F32);
        let err = Op::MatMul
            .validate(&[Input::Array(&v), Input::Array(&m)])
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidShape { op: "matmul", .. }));
    }

    #[test]
    fn test_matmul_gradient_shapes() {
        let a = NdArray::ones([2, 3], DType::F64);
        let b = NdArray::ones([3, 4], DType::F64);
        let inputs = [Input::Array(&a), Input::Array(&b)];
        let (out, params) = Op::MatMul.evaluate(&inputs).unwrap();
        let g = Op::MatMul
            .gradient(&NdArray::ones([2, 4], DType::F64), &inputs, &params, &out)
            .unwrap();
        assert_eq!(g[0].as_ref().unwrap().shape().dims(), &[2, 3]);
        assert_eq!(g[1].as_ref().unwrap().shape().dims(), &[3, 4]);
        assert_eq!(g[0].as_ref().unwrap().as_slice(), &[4.0; 6]);
        assert_eq!(g[1].as_ref().unwrap().as_slice(), &[2.0; 12]);
    }

    #[test]
    fn test_inv_gradient_one_by_one() {
        // d(1/a)/da = -1/a^2
        let a = NdArray::with_dtype([1, 1], vec![2.0], DType::F64).unwrap();
        let inputs = [Input::Array(&a)];
        let (out, params) = Op::Inv.evaluate(&inputs).unwrap();
        assert_relative_eq!(out.as_slice()[0], 0.5);

        let up = NdArray::ones([1, 1], DType::F64);
        let g = Op::Inv.gradient(&up, &inputs, &params, &out).unwrap();
        assert_relative_eq!(g[0].as_ref().unwrap().as_slice()[0], -0.25);
    }

    #[test]
    fn test_inv_batched() {
        let a = NdArray::with_dtype([2, 2, 2], vec![2.0, 0.0, 0.0, 4.0, 1.0, 1.0, 0.0, 1.0], DType::F64)
            .unwrap();
        let (out, _) = Op::Inv.evaluate(&[Input::Array(&a)]).unwrap();
        assert_eq!(out.as_slice(), &[0.5, 0.0, 0.0, 0.25, 1.0, -1.0, 0.0, 1.0]);

        let not_square = NdArray::zeros([2, 3], DType::F64);
        assert!(Op::Inv.validate(&[Input::Array(&not_square)]).is_err());
    }
}
