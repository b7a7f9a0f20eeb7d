//! Scalar broadcasting for binary element-wise operations.
//!
//! Equal shapes pass through. Otherwise a one-element operand is expanded to
//! the other operand's shape through a recorded [`Op::Expand`] node, so its
//! gradient sums back. Any other combination is a shape error.

use crate::error::{GraphError, Result};
use crate::graph::Operand;
use crate::ops::Op;
use crate::tensor::Tensor;

/// Bring `lhs` and `rhs` to a common shape for `op`.
pub fn broadcast<'g>(op: Op, lhs: Tensor<'g>, rhs: Tensor<'g>) -> Result<(Tensor<'g>, Tensor<'g>)> {
    lhs.ensure_same_graph(&rhs)?;
    let (ls, rs) = (lhs.shape(), rhs.shape());
    if ls == rs {
        return Ok((lhs, rhs));
    }
    if rs.is_scalar_like() {
        let expanded = expand_to(rhs, lhs)?;
        Ok((lhs, expanded))
    } else if ls.is_scalar_like() {
        let expanded = expand_to(lhs, rhs)?;
        Ok((expanded, rhs))
    } else {
        Err(GraphError::ShapeMismatch {
            op: op.name(),
            lhs: ls,
            rhs: rs,
        })
    }
}

fn expand_to<'g>(scalar: Tensor<'g>, like: Tensor<'g>) -> Result<Tensor<'g>> {
    scalar.graph().apply(
        Op::Expand,
        &[Operand::Node(scalar.id()), Operand::Shape(like.shape())],
    )
}

/// Broadcast, then apply a binary element-wise `op`.
pub(crate) fn elementwise<'g>(op: Op, lhs: Tensor<'g>, rhs: Tensor<'g>) -> Result<Tensor<'g>> {
    debug_assert!(op.is_elementwise_binary());
    let (lhs, rhs) = broadcast(op, lhs, rhs)?;
    lhs.graph()
        .apply(op, &[Operand::Node(lhs.id()), Operand::Node(rhs.id())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::NdArray;
    use crate::graph::Graph;

    #[test]
    fn test_equal_shapes_pass_through() {
        let g = Graph::new();
        let a = g.array(NdArray::from_vec(vec![1.0, 2.0]));
        let b = g.array(NdArray::from_vec(vec![3.0, 4.0]));
        let (l, r) = broadcast(Op::Add, a, b).unwrap();
        assert_eq!((l.id(), r.id()), (a.id(), b.id()));
    }

    #[test]
    fn test_scalar_side_expands() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let s = g.scalar(2.0);
        let m = g.array(NdArray::zeros([2, 2], Default::default()));

        let (l, r) = broadcast(Op::Mul, s, m).unwrap();
        assert_eq!(l.operation(), Some(Op::Expand));
        assert_eq!(l.shape().dims(), &[2, 2]);
        assert_eq!(r.id(), m.id());

        let (l, r) = broadcast(Op::Mul, m, s).unwrap();
        assert_eq!(l.id(), m.id());
        assert_eq!(r.value().as_slice(), &[2.0; 4]);
    }

    #[test]
    fn test_incompatible_shapes() {
        let g = Graph::new();
        let a = g.array(NdArray::from_vec(vec![1.0, 2.0]));
        let b = g.array(NdArray::from_vec(vec![1.0, 2.0, 3.0]));
        let err = broadcast(Op::Sub, a, b).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { op: "sub", .. }));
    }
}
