//! Shape-changing operations: expand, transpose, reshape.

use super::{array_at, shape_at, Input, Op, Params};
use crate::array::NdArray;
use crate::error::{GraphError, Result};

pub(super) fn validate_expand(inputs: &[Input<'_>]) -> Result<()> {
    let a = array_at(Op::Expand, inputs, 0)?;
    shape_at(Op::Expand, inputs, 1)?;
    if !a.is_scalar_like() {
        return Err(GraphError::invalid_shape(
            "expand",
            format!("only a one-element array can be expanded, got shape {}", a.shape()),
        ));
    }
    Ok(())
}

pub(super) fn evaluate_expand(inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let a = array_at(Op::Expand, inputs, 0)?;
    let target = shape_at(Op::Expand, inputs, 1)?;
    Ok((NdArray::full(target.clone(), a.item()?, a.dtype()), Params::None))
}

pub(super) fn gradient_expand(upstream: &NdArray, inputs: &[Input<'_>]) -> Result<Vec<Option<NdArray>>> {
    let a = array_at(Op::Expand, inputs, 0)?;
    let summed = NdArray::full(a.shape().clone(), upstream.sum(), upstream.dtype());
    Ok(vec![Some(summed), None])
}

pub(super) fn tangent_expand(
    inputs: &[Input<'_>],
    tangents: &[Option<&NdArray>],
) -> Result<Option<NdArray>> {
    let target = shape_at(Op::Expand, inputs, 1)?;
    match tangents.first().copied().flatten() {
        Some(t) => Ok(Some(NdArray::full(target.clone(), t.item()?, t.dtype()))),
        None => Ok(None),
    }
}

pub(super) fn evaluate_transpose(inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let a = array_at(Op::Transpose, inputs, 0)?;
    Ok((a.transpose(), Params::None))
}

pub(super) fn validate_reshape(inputs: &[Input<'_>]) -> Result<()> {
    let a = array_at(Op::Reshape, inputs, 0)?;
    let target = shape_at(Op::Reshape, inputs, 1)?;
    if a.numel() != target.numel() {
        return Err(GraphError::ShapeMismatch {
            op: "reshape",
            lhs: a.shape().clone(),
            rhs: target.clone(),
        });
    }
    Ok(())
}

pub(super) fn evaluate_reshape(inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let a = array_at(Op::Reshape, inputs, 0)?;
    let target = shape_at(Op::Reshape, inputs, 1)?;
    Ok((a.reshape(target)?, Params::Shape(a.shape().clone())))
}

pub(super) fn gradient_reshape(upstream: &NdArray, params: &Params) -> Result<Vec<Option<NdArray>>> {
    let Params::Shape(original) = params else {
        return Err(GraphError::type_error("reshape: missing original shape"));
    };
    Ok(vec![Some(upstream.reshape(original)?), None])
}

pub(super) fn tangent_reshape(
    inputs: &[Input<'_>],
    tangents: &[Option<&NdArray>],
) -> Result<Option<NdArray>> {
    let target = shape_at(Op::Reshape, inputs, 1)?;
    tangents
        .first()
        .copied()
        .flatten()
        .map(|t| t.reshape(target))
        .transpose()
}
