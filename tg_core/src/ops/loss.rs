//! Whole-array reductions: softmax and mean squared error.

use super::{array_at, Input, Op, Params};
use crate::array::NdArray;
use crate::error::{GraphError, Result};

pub(super) fn evaluate_softmax(inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let a = array_at(Op::Softmax, inputs, 0)?;
    // shift by the max for stability
    let max = a.as_slice().iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp = a.map(|v| (v - max).exp());
    let total = exp.sum();
    Ok((exp.map(|v| v / total), Params::None))
}

/// `s * (v - sum(v * s))` for the softmax output `s`.
fn softmax_jacobian_product(v: &NdArray, output: &NdArray) -> Result<NdArray> {
    let dot = v.mul(output)?.sum();
    output.zip_map(v, "softmax", |s, g| s * (g - dot))
}

pub(super) fn gradient_softmax(upstream: &NdArray, output: &NdArray) -> Result<Vec<Option<NdArray>>> {
    Ok(vec![Some(softmax_jacobian_product(upstream, output)?)])
}

pub(super) fn tangent_softmax(tangents: &[Option<&NdArray>], output: &NdArray) -> Result<Option<NdArray>> {
    tangents[0]
        .map(|t| softmax_jacobian_product(t, output))
        .transpose()
}

pub(super) fn validate_mse(inputs: &[Input<'_>]) -> Result<()> {
    let out = array_at(Op::MeanSquaredError, inputs, 0)?;
    let target = array_at(Op::MeanSquaredError, inputs, 1)?;
    if out.shape() != target.shape() {
        return Err(GraphError::ShapeMismatch {
            op: "mean_squared_error",
            lhs: out.shape().clone(),
            rhs: target.shape().clone(),
        });
    }
    Ok(())
}

pub(super) fn evaluate_mse(inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let out = array_at(Op::MeanSquaredError, inputs, 0)?;
    let target = array_at(Op::MeanSquaredError, inputs, 1)?;
    let diff = out.sub(target)?;
    let value = diff.mul(&diff)?.sum() / diff.numel() as f64;
    let dtype = diff.dtype();
    Ok((NdArray::full([1], value, dtype), Params::None))
}

/// `2 (a - b) / n`, the derivative of the loss with respect to `a`.
fn mse_partial(inputs: &[Input<'_>]) -> Result<NdArray> {
    let out = array_at(Op::MeanSquaredError, inputs, 0)?;
    let target = array_at(Op::MeanSquaredError, inputs, 1)?;
    let n = out.numel() as f64;
    out.zip_map(target, "mean_squared_error", |a, b| 2.0 * (a - b) / n)
}

pub(super) fn gradient_mse(upstream: &NdArray, inputs: &[Input<'_>]) -> Result<Vec<Option<NdArray>>> {
    let g = upstream.item()?;
    let partial = mse_partial(inputs)?;
    Ok(vec![Some(partial.scale(g)), Some(partial.scale(-g))])
}

pub(super) fn tangent_mse(inputs: &[Input<'_>], tangents: &[Option<&NdArray>]) -> Result<Option<NdArray>> {
    let partial = mse_partial(inputs)?;
    let mut total = 0.0;
    if let Some(da) = tangents[0] {
        total += partial.mul(da)?.sum();
    }
    if let Some(db) = tangents[1] {
        total -= partial.mul(db)?.sum();
    }
    Ok(Some(NdArray::full([1], total, partial.dtype())))
}
