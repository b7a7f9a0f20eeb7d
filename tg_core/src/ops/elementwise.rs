//! Element-wise operations: arithmetic, powers, logarithm and trigonometry.

use super::{array_at, Input, Op, Params};
use crate::array::NdArray;
use crate::error::{GraphError, Result};

pub(super) fn validate_binary(op: Op, inputs: &[Input<'_>]) -> Result<()> {
    let a = array_at(op, inputs, 0)?;
    let b = array_at(op, inputs, 1)?;
    if a.shape() != b.shape() {
        return Err(GraphError::ShapeMismatch {
            op: op.name(),
            lhs: a.shape().clone(),
            rhs: b.shape().clone(),
        });
    }
    Ok(())
}

pub(super) fn evaluate_binary(op: Op, inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let a = array_at(op, inputs, 0)?;
    let b = array_at(op, inputs, 1)?;
    let out = match op {
        Op::Add => a.add(b)?,
        Op::Sub => a.sub(b)?,
        Op::Mul => a.mul(b)?,
        Op::Div => a.div(b)?,
        Op::Pow => a.zip_map(b, "pow", f64::powf)?,
        _ => unreachable!("{} is not a binary element-wise op", op),
    };
    Ok((out, Params::None))
}

pub(super) fn evaluate_unary(op: Op, inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let a = array_at(op, inputs, 0)?;
    let out = match op {
        Op::Ln => a.map(f64::ln),
        Op::Exp => a.map(f64::exp),
        Op::Sin => a.map(f64::sin),
        Op::Cos => a.map(f64::cos),
        Op::Tan => a.map(f64::tan),
        Op::Sigmoid => a.map(sigmoid),
        _ => unreachable!("{} is not a unary element-wise op", op),
    };
    Ok((out, Params::None))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Partial derivatives `(d out / d a, d out / d b)` of a binary op, element-wise.
fn binary_partials(op: Op, a: &NdArray, b: &NdArray, out: &NdArray) -> Result<(NdArray, NdArray)> {
    let ones = NdArray::ones(a.shape().clone(), a.dtype());
    Ok(match op {
        Op::Add => (ones.clone(), ones),
        Op::Sub => (ones.clone(), ones.neg()),
        Op::Mul => (b.clone(), a.clone()),
        // d/da = 1/b, d/db = -a/b^2
        Op::Div => (
            b.map(|v| 1.0 / v),
            a.zip_map(b, "div", |x, y| -x / (y * y))?,
        ),
        // d/db = ln(a) * a^b
        Op::Pow => (
            a.zip_map(b, "pow", |x, y| y * x.powf(y - 1.0))?,
            a.zip_map(out, "pow", |x, o| x.ln() * o)?,
        ),
        _ => unreachable!("{} is not a binary element-wise op", op),
    })
}

/// Derivative `d out / d a` of a unary op, element-wise.
fn unary_partial(op: Op, a: &NdArray, out: &NdArray) -> NdArray {
    match op {
        Op::Ln => a.map(|x| 1.0 / x),
        Op::Exp => out.clone(),
        Op::Sin => a.map(f64::cos),
        Op::Cos => a.map(|x| -x.sin()),
        Op::Tan => a.map(|x| 1.0 / (x.cos() * x.cos())),
        Op::Sigmoid => out.map(|s| s * (1.0 - s)),
        _ => unreachable!("{} is not a unary element-wise op", op),
    }
}

pub(super) fn gradient_binary(
    op: Op,
    upstream: &NdArray,
    inputs: &[Input<'_>],
    output: &NdArray,
) -> Result<Vec<Option<NdArray>>> {
    let a = array_at(op, inputs, 0)?;
    let b = array_at(op, inputs, 1)?;
    let (da, db) = binary_partials(op, a, b, output)?;
    Ok(vec![Some(upstream.mul(&da)?), Some(upstream.mul(&db)?)])
}

pub(super) fn gradient_unary(
    op: Op,
    upstream: &NdArray,
    inputs: &[Input<'_>],
    output: &NdArray,
) -> Result<Vec<Option<NdArray>>> {
    let a = array_at(op, inputs, 0)?;
    Ok(vec![Some(upstream.mul(&unary_partial(op, a, output))?)])
}

pub(super) fn tangent_binary(
    op: Op,
    inputs: &[Input<'_>],
    tangents: &[Option<&NdArray>],
    output: &NdArray,
) -> Result<Option<NdArray>> {
    let a = array_at(op, inputs, 0)?;
    let b = array_at(op, inputs, 1)?;
    let (da, db) = binary_partials(op, a, b, output)?;

    let mut total: Option<NdArray> = None;
    for (t, partial) in tangents.iter().zip([da, db]) {
        if let Some(t) = t {
            let term = t.mul(&partial)?;
            match total.as_mut() {
                Some(acc) => acc.add_assign(&term)?,
                None => total = Some(term),
            }
        }
    }
    Ok(total)
}

pub(super) fn tangent_unary(
    op: Op,
    inputs: &[Input<'_>],
    tangents: &[Option<&NdArray>],
    output: &NdArray,
) -> Result<Option<NdArray>> {
    let a = array_at(op, inputs, 0)?;
    match tangents.first().copied().flatten() {
        Some(t) => Ok(Some(t.mul(&unary_partial(op, a, output))?)),
        None => Ok(None),
    }
}
