//! Tensor handles: accessors, the operation surface and operator overloads.

use std::fmt;
use std::ops::Range;

use crate::array::{DType, NdArray};
use crate::broadcast;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeId, Operand};
use crate::ops::Op;
use crate::shape::Shape;

/// Handle to a node in a [`Graph`].
///
/// Handles are `Copy`; the node itself lives in the graph's arena for as long
/// as the graph does.
#[derive(Clone, Copy)]
pub struct Tensor<'g> {
    graph: &'g Graph,
    id: NodeId,
}

impl<'g> Tensor<'g> {
    pub(crate) fn new(graph: &'g Graph, id: NodeId) -> Self {
        Tensor { graph, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub(crate) fn ensure_same_graph(&self, other: &Tensor<'_>) -> Result<()> {
        if std::ptr::eq(self.graph, other.graph) {
            Ok(())
        } else {
            Err(GraphError::Consistency {
                message: format!("{} and {} belong to different graphs", self.id, other.id),
            })
        }
    }

    // === Node state ===

    pub fn value(&self) -> NdArray {
        self.graph.nodes()[self.id.index].value.clone()
    }

    /// Replace the value. The shape must match; the data is cast to the node's dtype.
    pub fn set_value(&self, value: NdArray) -> Result<()> {
        let mut nodes = self.graph.nodes_mut();
        let node = &mut nodes[self.id.index];
        node.value.expect_same_shape(&value, "set_value")?;
        node.value = value.cast(node.value.dtype());
        Ok(())
    }

    pub fn gradient(&self) -> Option<NdArray> {
        self.graph.nodes()[self.id.index].gradient.clone()
    }

    /// Replace the gradient. The shape must match the value's.
    pub fn set_gradient(&self, gradient: NdArray) -> Result<()> {
        let mut nodes = self.graph.nodes_mut();
        let node = &mut nodes[self.id.index];
        node.value.expect_same_shape(&gradient, "set_gradient")?;
        node.gradient = Some(gradient.cast(node.value.dtype()));
        Ok(())
    }

    pub fn clear_gradient(&self) {
        self.graph.nodes_mut()[self.id.index].gradient = None;
    }

    pub fn shape(&self) -> Shape {
        self.graph.nodes()[self.id.index].value.shape().clone()
    }

    pub fn dtype(&self) -> DType {
        self.graph.nodes()[self.id.index].value.dtype()
    }

    pub fn name(&self) -> Option<String> {
        self.graph.nodes()[self.id.index].name.clone()
    }

    pub fn track_grads(&self) -> bool {
        self.graph.nodes()[self.id.index].track_grads
    }

    /// The producing operation, if recorded.
    pub fn operation(&self) -> Option<Op> {
        self.graph.nodes()[self.id.index].producer.as_ref().map(|p| p.op)
    }

    /// The operands of the producing operation; empty for leaves.
    pub fn inputs(&self) -> Vec<Operand> {
        self.graph.nodes()[self.id.index]
            .producer
            .as_ref()
            .map(|p| p.inputs.clone())
            .unwrap_or_default()
    }

    pub fn is_leaf(&self) -> bool {
        self.graph.nodes()[self.id.index].is_leaf()
    }

    // === Indexing ===

    /// Read one element.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        self.graph.nodes()[self.id.index].value.get(index)
    }

    /// Write one element of the value in place.
    pub fn set(&self, index: &[usize], value: f64) -> Result<()> {
        self.graph.nodes_mut()[self.id.index].value.set(index, value)
    }

    /// Copy a sub-array into a fresh untracked leaf.
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<Tensor<'g>> {
        let part = self.graph.nodes()[self.id.index].value.slice(ranges)?;
        Ok(self.graph.constant(part))
    }

    // === Operations ===

    fn unary(self, op: Op) -> Result<Tensor<'g>> {
        self.graph.apply(op, &[Operand::Node(self.id)])
    }

    fn binary(self, op: Op, rhs: Tensor<'g>) -> Result<Tensor<'g>> {
        self.ensure_same_graph(&rhs)?;
        self.graph
            .apply(op, &[Operand::Node(self.id), Operand::Node(rhs.id)])
    }

    /// One-element untracked constant in the graph's default dtype.
    pub(crate) fn constant_like(&self, value: f64) -> Tensor<'g> {
        self.graph
            .constant(NdArray::full([1], value, self.graph.options().default_dtype))
    }

    /// Element-wise `self ^ exponent`, with broadcasting.
    pub fn pow(self, exponent: Tensor<'g>) -> Result<Tensor<'g>> {
        broadcast::elementwise(Op::Pow, self, exponent)
    }

    /// Element-wise `self ^ exponent` for a constant exponent.
    pub fn powf(self, exponent: f64) -> Result<Tensor<'g>> {
        self.pow(self.constant_like(exponent))
    }

    /// Matrix product of two 2-D tensors.
    pub fn matmul(self, rhs: Tensor<'g>) -> Result<Tensor<'g>> {
        self.binary(Op::MatMul, rhs)
    }

    /// Reverse all axes.
    pub fn transpose(self) -> Result<Tensor<'g>> {
        self.unary(Op::Transpose)
    }

    pub fn t(self) -> Result<Tensor<'g>> {
        self.transpose()
    }

    pub fn reshape(self, shape: impl Into<Shape>) -> Result<Tensor<'g>> {
        self.graph
            .apply(Op::Reshape, &[Operand::Node(self.id), Operand::Shape(shape.into())])
    }

    /// Broadcast a one-element tensor to `shape`.
    pub fn expand(self, shape: impl Into<Shape>) -> Result<Tensor<'g>> {
        self.graph
            .apply(Op::Expand, &[Operand::Node(self.id), Operand::Shape(shape.into())])
    }

    pub fn ln(self) -> Result<Tensor<'g>> {
        self.unary(Op::Ln)
    }

    pub fn exp(self) -> Result<Tensor<'g>> {
        self.unary(Op::Exp)
    }

    pub fn sin(self) -> Result<Tensor<'g>> {
        self.unary(Op::Sin)
    }

    pub fn cos(self) -> Result<Tensor<'g>> {
        self.unary(Op::Cos)
    }

    pub fn tan(self) -> Result<Tensor<'g>> {
        self.unary(Op::Tan)
    }

    pub fn sigmoid(self) -> Result<Tensor<'g>> {
        self.unary(Op::Sigmoid)
    }

    /// Softmax over all elements.
    pub fn softmax(self) -> Result<Tensor<'g>> {
        self.unary(Op::Softmax)
    }

    /// Inverse of the square matrices along the last two axes.
    pub fn inv(self) -> Result<Tensor<'g>> {
        self.unary(Op::Inv)
    }

    /// Valid 2-D correlation of an `(H, W, C)` input with an `(O, kH, kW, C)` kernel.
    pub fn conv2d(self, kernel: Tensor<'g>) -> Result<Tensor<'g>> {
        self.binary(Op::Conv2d, kernel)
    }

    /// Mean squared error against `target`, shape `[1]`.
    pub fn mse(self, target: Tensor<'g>) -> Result<Tensor<'g>> {
        self.binary(Op::MeanSquaredError, target)
    }
}

impl fmt::Display for Tensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.graph.nodes()[self.id.index].value)
    }
}

impl fmt::Debug for Tensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self.graph.nodes();
        let node = &nodes[self.id.index];
        let mut s = f.debug_struct("Tensor");
        s.field("id", &self.id.index()).field("shape", node.value.shape());
        if let Some(name) = &node.name {
            s.field("name", name);
        }
        if let Some(p) = &node.producer {
            s.field("op", &p.op);
        }
        s.field("track_grads", &node.track_grads).finish()
    }
}

// === Operator overloads ===
//
// Every operator returns `Result<Tensor>`. Intermediate results can be fed
// straight back in, so `(x * y) + x` works without `?` in between. Plain
// `f64` operands become untracked constants.

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<'g> std::ops::$trait<Tensor<'g>> for Tensor<'g> {
            type Output = Result<Tensor<'g>>;
            fn $method(self, rhs: Tensor<'g>) -> Self::Output {
                broadcast::elementwise($op, self, rhs)
            }
        }

        impl<'g> std::ops::$trait<&Tensor<'g>> for Tensor<'g> {
            type Output = Result<Tensor<'g>>;
            fn $method(self, rhs: &Tensor<'g>) -> Self::Output {
                broadcast::elementwise($op, self, *rhs)
            }
        }

        impl<'g> std::ops::$trait<Tensor<'g>> for &Tensor<'g> {
            type Output = Result<Tensor<'g>>;
            fn $method(self, rhs: Tensor<'g>) -> Self::Output {
                broadcast::elementwise($op, *self, rhs)
            }
        }

        impl<'g> std::ops::$trait<&Tensor<'g>> for &Tensor<'g> {
            type Output = Result<Tensor<'g>>;
            fn $method(self, rhs: &Tensor<'g>) -> Self::Output {
                broadcast::elementwise($op, *self, *rhs)
            }
        }

        impl<'g> std::ops::$trait<Result<Tensor<'g>>> for Tensor<'g> {
            type Output = Result<Tensor<'g>>;
            fn $method(self, rhs: Result<Tensor<'g>>) -> Self::Output {
                broadcast::elementwise($op, self, rhs?)
            }
        }

        impl<'g> std::ops::$trait<Tensor<'g>> for Result<Tensor<'g>> {
            type Output = Result<Tensor<'g>>;
            fn $method(self, rhs: Tensor<'g>) -> Self::Output {
                broadcast::elementwise($op, self?, rhs)
            }
        }

        impl<'g> std::ops::$trait<f64> for Tensor<'g> {
            type Output = Result<Tensor<'g>>;
            fn $method(self, rhs: f64) -> Self::Output {
                broadcast::elementwise($op, self, self.constant_like(rhs))
            }
        }

        impl<'g> std::ops::$trait<Tensor<'g>> for f64 {
            type Output = Result<Tensor<'g>>;
            fn $method(self, rhs: Tensor<'g>) -> Self::Output {
                broadcast::elementwise($op, rhs.constant_like(self), rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, Op::Add);
impl_binary_operator!(Sub, sub, Op::Sub);
impl_binary_operator!(Mul, mul, Op::Mul);
impl_binary_operator!(Div, div, Op::Div);

impl<'g> std::ops::Neg for Tensor<'g> {
    type Output = Result<Tensor<'g>>;
    fn neg(self) -> Self::Output {
        -1.0 * self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_accessors() {
        let g = Graph::new();
        let x = g.placeholder("x", NdArray::from_vec(vec![1.0, 2.0, 3.0]));
        assert_eq!(x.name().as_deref(), Some("x"));
        assert_eq!(x.shape().dims(), &[3]);
        assert_eq!(x.dtype(), DType::F32);
        assert!(x.is_leaf());
        assert!(x.track_grads());
        assert!(x.gradient().is_none());
        assert!(x.inputs().is_empty());
    }

    #[test]
    fn test_setters_enforce_shape() {
        let g = Graph::new();
        let x = g.array(NdArray::from_vec(vec![1.0, 2.0]));
        assert!(x.set_value(NdArray::from_vec(vec![1.0])).is_err());
        assert!(x.set_gradient(NdArray::from_vec(vec![1.0, 2.0, 3.0])).is_err());

        x.set_value(NdArray::from_vec(vec![5.0, 6.0])).unwrap();
        assert_eq!(x.value().as_slice(), &[5.0, 6.0]);
        x.set_gradient(NdArray::from_vec(vec![0.5, 0.5])).unwrap();
        assert_eq!(x.gradient().unwrap().as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn test_indexing() {
        let g = Graph::new();
        let m = g.array(NdArray::new([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap());
        assert_eq!(m.get(&[1, 1]).unwrap(), 4.0);
        m.set(&[0, 0], 10.0).unwrap();
        assert_eq!(m.get(&[0, 0]).unwrap(), 10.0);
        assert!(matches!(
            m.get(&[0, 2]),
            Err(GraphError::IndexOutOfBounds { .. })
        ));

        let row = m.slice(&[1..2]).unwrap();
        assert!(!row.track_grads());
        assert_eq!(row.value().as_slice(), &[3.0, 4.0]);
    }

    #[test]
    fn test_operators_chain() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let x = g.scalar(2.0);
        let y = g.scalar(3.0);

        let z = (x * y + x).unwrap();
        assert_eq!(z.value().as_slice(), &[8.0]);
        assert_eq!(z.operation(), Some(Op::Add));

        let w = ((2.0 * x).unwrap() - 1.0).unwrap();
        assert_eq!(w.value().as_slice(), &[3.0]);
        assert_eq!((-x).unwrap().value().as_slice(), &[-2.0]);
        assert_relative_eq!((&x / &y).unwrap().value().as_slice()[0], 2.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cross_graph_operands() {
        let g1 = Graph::new();
        let g2 = Graph::new();
        let a = g1.scalar(1.0);
        let b = g2.scalar(1.0);
        assert!(matches!((a + b).unwrap_err(), GraphError::Consistency { .. }));
        assert!(matches!(a.matmul(b).unwrap_err(), GraphError::Consistency { .. }));
    }
}
