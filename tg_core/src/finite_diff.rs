//! Finite difference utilities for gradient verification.

use crate::array::NdArray;
use crate::error::{GraphError, Result};

/// Numerical gradient of a scalar function of an array, by central differences.
///
/// `f` is evaluated twice per element of `point`. The result has `point`'s
/// shape and dtype.
///
/// # Example
/// ```
/// use tg_core::{finite_diff_grad, DType, NdArray};
///
/// // f(v) = v0^2 + v1^2, so df/dv = 2v
/// let f = |v: &NdArray| Ok(v.as_slice().iter().map(|x| x * x).sum::<f64>());
/// let point = NdArray::with_dtype([2], vec![3.0, 4.0], DType::F64).unwrap();
/// let grads = finite_diff_grad(f, &point, 1e-6).unwrap();
///
/// assert!((grads.as_slice()[0] - 6.0).abs() < 1e-5);
/// assert!((grads.as_slice()[1] - 8.0).abs() < 1e-5);
/// ```
pub fn finite_diff_grad<F>(f: F, point: &NdArray, eps: f64) -> Result<NdArray>
where
    F: Fn(&NdArray) -> Result<f64>,
{
    let mut grads = Vec::with_capacity(point.numel());
    let mut data = point.as_slice().to_vec();
    let shape = point.shape().clone();

    for i in 0..data.len() {
        let original = data[i];

        data[i] = original + eps;
        let f_plus = f(&NdArray::with_dtype(shape.clone(), data.clone(), point.dtype())?)?;

        data[i] = original - eps;
        let f_minus = f(&NdArray::with_dtype(shape.clone(), data.clone(), point.dtype())?)?;

        data[i] = original;
        grads.push((f_plus - f_minus) / (2.0 * eps));
    }

    NdArray::with_dtype(shape, grads, point.dtype())
}

/// Largest absolute element-wise difference between two gradients of the same shape.
pub fn max_grad_error(a: &NdArray, b: &NdArray) -> Result<f64> {
    if a.shape() != b.shape() {
        return Err(GraphError::ShapeMismatch {
            op: "max_grad_error",
            lhs: a.shape().clone(),
            rhs: b.shape().clone(),
        });
    }
    Ok(a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;

    fn vec64(data: &[f64]) -> NdArray {
        NdArray::with_dtype([data.len()], data.to_vec(), DType::F64).unwrap()
    }

    #[test]
    fn test_finite_diff_quadratic() {
        // f(x, y) = x^2 + 2xy + y^2, both partials 2x + 2y
        let f = |v: &NdArray| {
            let (x, y) = (v.as_slice()[0], v.as_slice()[1]);
            Ok(x * x + 2.0 * x * y + y * y)
        };
        let grads = finite_diff_grad(f, &vec64(&[1.0, 2.0]), 1e-6).unwrap();
        assert!((grads.as_slice()[0] - 6.0).abs() < 1e-5);
        assert!((grads.as_slice()[1] - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_finite_diff_transcendental() {
        let f = |v: &NdArray| {
            let x = v.as_slice()[0];
            Ok(x.sin() * x.exp())
        };
        let grads = finite_diff_grad(f, &vec64(&[1.0]), 1e-6).unwrap();
        let expected = (1.0_f64.cos() + 1.0_f64.sin()) * 1.0_f64.exp();
        assert!((grads.as_slice()[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_errors_propagate() {
        let f = |_: &NdArray| Err(GraphError::type_error("boom"));
        assert!(finite_diff_grad(f, &vec64(&[1.0]), 1e-6).is_err());
    }

    #[test]
    fn test_max_grad_error() {
        let err = max_grad_error(&vec64(&[1.0, 2.0, 3.0]), &vec64(&[1.1, 2.0, 2.8])).unwrap();
        assert!((err - 0.2).abs() < 1e-10);
        assert!(max_grad_error(&vec64(&[1.0]), &vec64(&[1.0, 2.0])).is_err());
    }
}
