//! 2-D valid correlation over channel-last images.
//!
//! Layouts: input `(H, W, C)`, kernel `(O, kH, kW, C)`, output
//! `(H - kH + 1, W - kW + 1, O)`.

use super::{array_at, Input, Op, Params};
use crate::array::NdArray;
use crate::error::{GraphError, Result};
use crate::shape::Shape;

#[derive(Debug, Clone, Copy)]
struct Dims {
    h: usize,
    w: usize,
    c: usize,
    o: usize,
    kh: usize,
    kw: usize,
}

impl Dims {
    fn of(input: &NdArray, kernel: &NdArray) -> Result<Self> {
        let (is, ks) = (input.shape(), kernel.shape());
        if is.ndim() != 3 || ks.ndim() != 4 {
            return Err(GraphError::invalid_shape(
                "conv2d",
                format!("expected an (H, W, C) input and (O, kH, kW, C) kernel, got {} and {}", is, ks),
            ));
        }
        let dims = Dims {
            h: is.dim(0),
            w: is.dim(1),
            c: is.dim(2),
            o: ks.dim(0),
            kh: ks.dim(1),
            kw: ks.dim(2),
        };
        if dims.h <= dims.kh || dims.w <= dims.kw {
            return Err(GraphError::invalid_shape(
                "conv2d",
                format!("input {} must be larger than kernel {}", is, ks),
            ));
        }
        if dims.c != ks.dim(3) {
            return Err(GraphError::ShapeMismatch {
                op: "conv2d",
                lhs: is.clone(),
                rhs: ks.clone(),
            });
        }
        if dims.kh % 2 != 1 || dims.kw % 2 != 1 {
            return Err(GraphError::invalid_shape(
                "conv2d",
                format!("kernel spatial size must be odd, got {}x{}", dims.kh, dims.kw),
            ));
        }
        Ok(dims)
    }

    fn oh(&self) -> usize {
        self.h - self.kh + 1
    }

    fn ow(&self) -> usize {
        self.w - self.kw + 1
    }

    fn x(&self, i: usize, j: usize, c: usize) -> usize {
        (i * self.w + j) * self.c + c
    }

    fn k(&self, o: usize, u: usize, v: usize, c: usize) -> usize {
        ((o * self.kh + u) * self.kw + v) * self.c + c
    }

    fn y(&self, i: usize, j: usize, o: usize) -> usize {
        (i * self.ow() + j) * self.o + o
    }

    fn output_shape(&self) -> Shape {
        Shape::new(vec![self.oh(), self.ow(), self.o])
    }
}

fn correlate(d: &Dims, x: &[f64], k: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; d.oh() * d.ow() * d.o];
    for i in 0..d.oh() {
        for j in 0..d.ow() {
            for o in 0..d.o {
                let mut acc = 0.0;
                for u in 0..d.kh {
                    for v in 0..d.kw {
                        for c in 0..d.c {
                            acc += x[d.x(i + u, j + v, c)] * k[d.k(o, u, v, c)];
                        }
                    }
                }
                out[d.y(i, j, o)] = acc;
            }
        }
    }
    out
}

pub(super) fn validate(inputs: &[Input<'_>]) -> Result<()> {
    let x = array_at(Op::Conv2d, inputs, 0)?;
    let k = array_at(Op::Conv2d, inputs, 1)?;
    Dims::of(x, k).map(|_| ())
}

pub(super) fn evaluate(inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
    let x = array_at(Op::Conv2d, inputs, 0)?;
    let k = array_at(Op::Conv2d, inputs, 1)?;
    let d = Dims::of(x, k)?;
    let out = correlate(&d, x.as_slice(), k.as_slice());
    let value = NdArray::with_dtype(d.output_shape(), out, x.dtype().promote(k.dtype()))?;
    Ok((value, Params::None))
}

pub(super) fn gradient(upstream: &NdArray, inputs: &[Input<'_>]) -> Result<Vec<Option<NdArray>>> {
    let x = array_at(Op::Conv2d, inputs, 0)?;
    let k = array_at(Op::Conv2d, inputs, 1)?;
    let d = Dims::of(x, k)?;
    if upstream.shape() != &d.output_shape() {
        return Err(GraphError::ShapeMismatch {
            op: "conv2d",
            lhs: upstream.shape().clone(),
            rhs: d.output_shape(),
        });
    }
    let (xs, ks, g) = (x.as_slice(), k.as_slice(), upstream.as_slice());

    // kernel: valid correlation of each input channel with each upstream map
    // input: full correlation of upstream with the 180-degree rotated kernel
    let mut grad_k = vec![0.0; k.numel()];
    let mut grad_x = vec![0.0; x.numel()];
    for i in 0..d.oh() {
        for j in 0..d.ow() {
            for o in 0..d.o {
                let gv = g[d.y(i, j, o)];
                if gv == 0.0 {
                    continue;
                }
                for u in 0..d.kh {
                    for v in 0..d.kw {
                        for c in 0..d.c {
                            grad_k[d.k(o, u, v, c)] += xs[d.x(i + u, j + v, c)] * gv;
                            grad_x[d.x(i + u, j + v, c)] += ks[d.k(o, u, v, c)] * gv;
                        }
                    }
                }
            }
        }
    }

    let dtype = upstream.dtype().promote(x.dtype());
    Ok(vec![
        Some(NdArray::with_dtype(x.shape().clone(), grad_x, dtype)?),
        Some(NdArray::with_dtype(k.shape().clone(), grad_k, dtype)?),
    ])
}

pub(super) fn tangent(inputs: &[Input<'_>], tangents: &[Option<&NdArray>]) -> Result<Option<NdArray>> {
    let x = array_at(Op::Conv2d, inputs, 0)?;
    let k = array_at(Op::Conv2d, inputs, 1)?;
    let d = Dims::of(x, k)?;
    let mut out = vec![0.0; d.oh() * d.ow() * d.o];
    if let Some(dx) = tangents[0] {
        dx.expect_same_shape(x, "conv2d")?;
        for (acc, v) in out.iter_mut().zip(correlate(&d, dx.as_slice(), k.as_slice())) {
            *acc += v;
        }
    }
    if let Some(dk) = tangents[1] {
        dk.expect_same_shape(k, "conv2d")?;
        for (acc, v) in out.iter_mut().zip(correlate(&d, x.as_slice(), dk.as_slice())) {
            *acc += v;
        }
    }
    NdArray::with_dtype(d.output_shape(), out, x.dtype().promote(k.dtype())).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;

    fn image(h: usize, w: usize, c: usize) -> NdArray {
        let n = h * w * c;
        NdArray::with_dtype([h, w, c], (0..n).map(|v| v as f64).collect(), DType::F64).unwrap()
    }

    #[test]
    fn test_conv_output_shape_and_value() {
        let x = image(4, 5, 1);
        let k = NdArray::ones([2, 3, 3, 1], DType::F64);
        let (out, _) = Op::Conv2d.evaluate(&[Input::Array(&x), Input::Array(&k)]).unwrap();
        assert_eq!(out.shape().dims(), &[2, 3, 2]);
        // top-left window of 0..20 laid out 4x5: rows 0..3, cols 0..3
        let expected: f64 = [0.0, 1.0, 2.0, 5.0, 6.0, 7.0, 10.0, 11.0, 12.0].iter().sum();
        assert_eq!(out.get(&[0, 0, 0]).unwrap(), expected);
        assert_eq!(out.get(&[0, 0, 1]).unwrap(), expected);
    }

    #[test]
    fn test_conv_validation() {
        let x = image(3, 3, 1);
        let k = NdArray::ones([1, 3, 3, 1], DType::F64);
        assert!(Op::Conv2d.validate(&[Input::Array(&x), Input::Array(&k)]).is_err());

        let x = image(5, 5, 2);
        let wrong_channels = NdArray::ones([1, 3, 3, 1], DType::F64);
        let err = Op::Conv2d
            .validate(&[Input::Array(&x), Input::Array(&wrong_channels)])
            .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));

        let even = NdArray::ones([1, 2, 3, 2], DType::F64);
        assert!(Op::Conv2d.validate(&[Input::Array(&x), Input::Array(&even)]).is_err());
    }

    #[test]
    fn test_conv_gradient_against_sum() {
        // with an all-ones upstream the kernel gradient is the window sum per tap
        let x = image(3, 4, 1);
        let k = NdArray::ones([1, 1, 1, 1], DType::F64);
        let inputs = [Input::Array(&x), Input::Array(&k)];
        let (out, params) = Op::Conv2d.evaluate(&inputs).unwrap();
        let up = NdArray::ones(out.shape().clone(), DType::F64);
        let g = Op::Conv2d.gradient(&up, &inputs, &params, &out).unwrap();
        assert_eq!(g[1].as_ref().unwrap().as_slice(), &[x.sum()]);
        assert_eq!(g[0].as_ref().unwrap().as_slice(), &[1.0; 12]);
    }
}
