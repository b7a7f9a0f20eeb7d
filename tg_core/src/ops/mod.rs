//! The operation catalog.
//!
//! Every graph operation is a variant of the closed [`Op`] enum. Each variant
//! knows how to validate its raw inputs, evaluate them, produce one gradient
//! per operand for the backward pass, propagate a tangent for forward mode and
//! render itself as text.

mod conv;
mod elementwise;
mod linalg;
mod loss;
mod structural;

use crate::array::NdArray;
use crate::error::{GraphError, Result};
use crate::shape::Shape;

/// Operations that can produce a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // === Binary element-wise ===
    Add,
    Sub,
    Mul,
    Div,
    Pow,

    // === Unary element-wise ===
    Ln,
    Exp,
    Sin,
    Cos,
    Tan,
    Sigmoid,

    // === Structural ===
    /// Scalar-like array to a target shape. Inputs: array, shape.
    Expand,
    /// Reverse all axes.
    Transpose,
    /// Same data, new shape. Inputs: array, shape.
    Reshape,

    // === Linear algebra ===
    /// Inverse of the square matrices along the last two axes.
    Inv,
    MatMul,
    /// Valid 2-D correlation. Inputs: `(H, W, C)` array, `(O, kH, kW, C)` kernel.
    Conv2d,

    // === Reductions ===
    /// Softmax over all elements.
    Softmax,
    MeanSquaredError,
}

/// A raw operand as seen by an operation: an array value or a plain shape parameter.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    Array(&'a NdArray),
    Shape(&'a Shape),
}

/// Values produced by `evaluate` and handed back to `gradient`/`tangent`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    /// Shape of the operand before a reshape.
    Shape(Shape),
    /// Cached matrix inverse.
    Array(NdArray),
}

/// Output dialect for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Plain,
    Latex,
}

/// An operand rendered to text, plus the operation that produced it (if any).
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    pub op: Option<Op>,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Pow => "pow",
            Op::Ln => "ln",
            Op::Exp => "exp",
            Op::Sin => "sin",
            Op::Cos => "cos",
            Op::Tan => "tan",
            Op::Sigmoid => "sigmoid",
            Op::Expand => "expand",
            Op::Transpose => "transpose",
            Op::Reshape => "reshape",
            Op::Inv => "inv",
            Op::MatMul => "matmul",
            Op::Conv2d => "conv2d",
            Op::Softmax => "softmax",
            Op::MeanSquaredError => "mean_squared_error",
        }
    }

    /// Number of operands the operation takes.
    pub fn arity(self) -> usize {
        match self {
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Pow
            | Op::Expand
            | Op::Reshape
            | Op::MatMul
            | Op::Conv2d
            | Op::MeanSquaredError => 2,
            Op::Ln
            | Op::Exp
            | Op::Sin
            | Op::Cos
            | Op::Tan
            | Op::Sigmoid
            | Op::Transpose
            | Op::Inv
            | Op::Softmax => 1,
        }
    }

    pub fn is_elementwise_binary(self) -> bool {
        matches!(self, Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow)
    }

    /// Check operand kinds and shapes without computing anything.
    pub fn validate(self, inputs: &[Input<'_>]) -> Result<()> {
        if inputs.len() != self.arity() {
            return Err(GraphError::type_error(format!(
                "{} takes {} operands, got {}",
                self.name(),
                self.arity(),
                inputs.len()
            )));
        }
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
                elementwise::validate_binary(self, inputs)
            }
            Op::Ln | Op::Exp | Op::Sin | Op::Cos | Op::Tan | Op::Sigmoid => {
                array_at(self, inputs, 0).map(|_| ())
            }
            Op::Expand => structural::validate_expand(inputs),
            Op::Transpose => array_at(self, inputs, 0).map(|_| ()),
            Op::Reshape => structural::validate_reshape(inputs),
            Op::Inv => linalg::validate_inv(inputs),
            Op::MatMul => linalg::validate_matmul(inputs),
            Op::Conv2d => conv::validate(inputs),
            Op::Softmax => array_at(self, inputs, 0).map(|_| ()),
            Op::MeanSquaredError => loss::validate_mse(inputs),
        }
    }

    /// Compute the output value and the parameters the gradient rule needs.
    pub fn evaluate(self, inputs: &[Input<'_>]) -> Result<(NdArray, Params)> {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
                elementwise::evaluate_binary(self, inputs)
            }
            Op::Ln | Op::Exp | Op::Sin | Op::Cos | Op::Tan | Op::Sigmoid => {
                elementwise::evaluate_unary(self, inputs)
            }
            Op::Expand => structural::evaluate_expand(inputs),
            Op::Transpose => structural::evaluate_transpose(inputs),
            Op::Reshape => structural::evaluate_reshape(inputs),
            Op::Inv => linalg::evaluate_inv(inputs),
            Op::MatMul => linalg::evaluate_matmul(inputs),
            Op::Conv2d => conv::evaluate(inputs),
            Op::Softmax => loss::evaluate_softmax(inputs),
            Op::MeanSquaredError => loss::evaluate_mse(inputs),
        }
    }

    /// Gradient with respect to each operand given the upstream gradient.
    ///
    /// Returns one entry per operand; parameter operands get `None`.
    pub fn gradient(
        self,
        upstream: &NdArray,
        inputs: &[Input<'_>],
        params: &Params,
        output: &NdArray,
    ) -> Result<Vec<Option<NdArray>>> {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
                elementwise::gradient_binary(self, upstream, inputs, output)
            }
            Op::Ln | Op::Exp | Op::Sin | Op::Cos | Op::Tan | Op::Sigmoid => {
                elementwise::gradient_unary(self, upstream, inputs, output)
            }
            Op::Expand => structural::gradient_expand(upstream, inputs),
            Op::Transpose => Ok(vec![Some(upstream.transpose())]),
            Op::Reshape => structural::gradient_reshape(upstream, params),
            Op::Inv => linalg::gradient_inv(upstream, params),
            Op::MatMul => linalg::gradient_matmul(upstream, inputs),
            Op::Conv2d => conv::gradient(upstream, inputs),
            Op::Softmax => loss::gradient_softmax(upstream, output),
            Op::MeanSquaredError => loss::gradient_mse(upstream, inputs),
        }
    }

    /// Forward-mode rule: the output tangent from the operand tangents.
    ///
    /// A `None` tangent is a zero tangent. Returns `None` when every
    /// contributing tangent is zero.
    pub fn tangent(
        self,
        inputs: &[Input<'_>],
        tangents: &[Option<&NdArray>],
        params: &Params,
        output: &NdArray,
    ) -> Result<Option<NdArray>> {
        if tangents.iter().all(Option::is_none) {
            return Ok(None);
        }
        let t = match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
                elementwise::tangent_binary(self, inputs, tangents, output)?
            }
            Op::Ln | Op::Exp | Op::Sin | Op::Cos | Op::Tan | Op::Sigmoid => {
                elementwise::tangent_unary(self, inputs, tangents, output)?
            }
            Op::Expand => structural::tangent_expand(inputs, tangents)?,
            Op::Transpose => tangents[0].map(NdArray::transpose),
            Op::Reshape => structural::tangent_reshape(inputs, tangents)?,
            Op::Inv => linalg::tangent_inv(tangents, params)?,
            Op::MatMul => linalg::tangent_matmul(inputs, tangents)?,
            Op::Conv2d => conv::tangent(inputs, tangents)?,
            Op::Softmax => loss::tangent_softmax(tangents, output)?,
            Op::MeanSquaredError => loss::tangent_mse(inputs, tangents)?,
        };
        Ok(t)
    }

    /// Textual form of this operation applied to already-rendered operands.
    pub fn render(self, format: Format, inputs: &[Rendered]) -> String {
        let arg = |i: usize| inputs.get(i).map(|r| r.text.as_str()).unwrap_or("?");
        // operands that are themselves additive need parentheses under `*`
        let additive = |i: usize| {
            let r = inputs.get(i);
            let text = arg(i);
            match r.and_then(|r| r.op) {
                Some(Op::Add | Op::Sub) => format!("({})", text),
                _ => text.to_string(),
            }
        };
        // non-leaf operands are wrapped
        let grouped = |i: usize| {
            let text = arg(i);
            match inputs.get(i).and_then(|r| r.op) {
                Some(_) => format!("({})", text),
                None => text.to_string(),
            }
        };

        match (self, format) {
            (Op::Add, Format::Plain) => format!("{} + {}", arg(0), arg(1)),
            (Op::Add, Format::Latex) => format!("{}+{}", arg(0), arg(1)),
            (Op::Sub, Format::Plain) => format!("{} - {}", arg(0), arg(1)),
            (Op::Sub, Format::Latex) => format!("{}-{}", arg(0), arg(1)),
            (Op::Mul, Format::Plain) => format!("{} * {}", additive(0), additive(1)),
            (Op::Mul, Format::Latex) => format!("{}*{}", additive(0), additive(1)),
            (Op::Div, Format::Plain) => format!("{} / {}", grouped(0), grouped(1)),
            (Op::Div, Format::Latex) => format!("\\frac{{{}}}{{{}}}", arg(0), arg(1)),
            (Op::Pow, Format::Plain) => format!("{}^({})", grouped(0), arg(1)),
            (Op::Pow, Format::Latex) => format!("{}^{{{}}}", grouped(0), arg(1)),
            (Op::Ln, _) => format!("ln({})", arg(0)),
            (Op::Exp, Format::Plain) => format!("exp({})", arg(0)),
            (Op::Exp, Format::Latex) => format!("\\exp({})", arg(0)),
            (Op::Sin, _) => format!("sin({})", arg(0)),
            (Op::Cos, _) => format!("cos({})", arg(0)),
            (Op::Tan, _) => format!("tan({})", arg(0)),
            (Op::Sigmoid, Format::Plain) => format!("sigmoid({})", arg(0)),
            (Op::Sigmoid, Format::Latex) => format!("\\sigma({})", arg(0)),
            (Op::Expand | Op::Reshape, _) => arg(0).to_string(),
            (Op::Transpose, Format::Plain) => format!("{}.T", arg(0)),
            (Op::Transpose, Format::Latex) => format!("{}^T", arg(0)),
            (Op::Inv, Format::Plain) => format!("inv({})", arg(0)),
            (Op::Inv, Format::Latex) => format!("{}^{{-1}}", arg(0)),
            (Op::MatMul, Format::Plain) => format!("{}@{}", arg(0), arg(1)),
            (Op::MatMul, Format::Latex) => format!("{}\\times {}", arg(0), arg(1)),
            (Op::Conv2d, _) => format!("conv2d({})", arg(0)),
            (Op::Softmax, _) => format!("softmax({})", arg(0)),
            (Op::MeanSquaredError, _) => format!("error({})", arg(0)),
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The array operand at position `i`, or a type error if it is a shape parameter.
pub(crate) fn array_at<'a>(op: Op, inputs: &[Input<'a>], i: usize) -> Result<&'a NdArray> {
    match inputs.get(i) {
        Some(Input::Array(a)) => Ok(a),
        Some(Input::Shape(_)) => Err(GraphError::type_error(format!(
            "{}: operand {} must be an array, got a shape",
            op.name(),
            i
        ))),
        None => Err(GraphError::type_error(format!(
            "{}: missing operand {}",
            op.name(),
            i
        ))),
    }
}

/// The shape parameter at position `i`, or a type error if it is an array.
pub(crate) fn shape_at<'a>(op: Op, inputs: &[Input<'a>], i: usize) -> Result<&'a Shape> {
    match inputs.get(i) {
        Some(Input::Shape(s)) => Ok(s),
        _ => Err(GraphError::type_error(format!(
            "{}: operand {} must be a shape",
            op.name(),
            i
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(text: &str) -> Rendered {
        Rendered {
            text: text.to_string(),
            op: None,
        }
    }

    fn node(text: &str, op: Op) -> Rendered {
        Rendered {
            text: text.to_string(),
            op: Some(op),
        }
    }

    #[test]
    fn test_arity_checked() {
        let a = NdArray::from_vec(vec![1.0]);
        let err = Op::Add.validate(&[Input::Array(&a)]).unwrap_err();
        assert!(matches!(err, GraphError::Type { .. }));
    }

    #[test]
    fn test_shape_operand_rejected_as_array() {
        let s = Shape::new(vec![2]);
        let err = Op::Exp.validate(&[Input::Shape(&s)]).unwrap_err();
        assert!(matches!(err, GraphError::Type { .. }));
    }

    #[test]
    fn test_render_mul_parenthesizes_sums() {
        let sum = node("x + y", Op::Add);
        let z = leaf("z");
        assert_eq!(Op::Mul.render(Format::Plain, &[sum.clone(), z.clone()]), "(x + y) * z");
        assert_eq!(Op::Mul.render(Format::Latex, &[z, sum]), "z*(x+y)");
    }

    #[test]
    fn test_render_div_and_pow() {
        let e = node("exp(x)", Op::Exp);
        assert_eq!(Op::Div.render(Format::Plain, &[e.clone(), leaf("y")]), "(exp(x)) / y");
        assert_eq!(Op::Div.render(Format::Latex, &[leaf("a"), leaf("b")]), "\\frac{a}{b}");
        assert_eq!(Op::Pow.render(Format::Plain, &[leaf("x"), leaf("2")]), "x^(2)");
        assert_eq!(Op::Pow.render(Format::Latex, &[e, leaf("2")]), "(exp(x))^{2}");
    }

    #[test]
    fn test_render_structural() {
        assert_eq!(Op::Transpose.render(Format::Plain, &[leaf("A")]), "A.T");
        assert_eq!(Op::Transpose.render(Format::Latex, &[leaf("A")]), "A^T");
        assert_eq!(Op::MatMul.render(Format::Plain, &[leaf("A"), leaf("B")]), "A@B");
        assert_eq!(Op::Expand.render(Format::Plain, &[leaf("s"), leaf("(3,)")]), "s");
        assert_eq!(Op::Inv.render(Format::Latex, &[leaf("A")]), "A^{-1}");
    }
}
