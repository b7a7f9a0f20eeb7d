//! Free-function forms of the tensor operations.

use crate::error::Result;
use crate::shape::Shape;
use crate::tensor::Tensor;

pub fn ln(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.ln()
}

pub fn exp(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.exp()
}

pub fn sin(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.sin()
}

pub fn cos(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.cos()
}

pub fn tan(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.tan()
}

pub fn sigmoid(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.sigmoid()
}

pub fn softmax(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.softmax()
}

pub fn expand(x: Tensor<'_>, shape: impl Into<Shape>) -> Result<Tensor<'_>> {
    x.expand(shape)
}

pub fn transpose(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.transpose()
}

pub fn inv(x: Tensor<'_>) -> Result<Tensor<'_>> {
    x.inv()
}

pub fn matmul<'g>(lhs: Tensor<'g>, rhs: Tensor<'g>) -> Result<Tensor<'g>> {
    lhs.matmul(rhs)
}

pub fn reshape(x: Tensor<'_>, shape: impl Into<Shape>) -> Result<Tensor<'_>> {
    x.reshape(shape)
}

pub fn conv2d<'g>(input: Tensor<'g>, kernel: Tensor<'g>) -> Result<Tensor<'g>> {
    input.conv2d(kernel)
}

pub fn mean_squared_error<'g>(output: Tensor<'g>, target: Tensor<'g>) -> Result<Tensor<'g>> {
    output.mse(target)
}
