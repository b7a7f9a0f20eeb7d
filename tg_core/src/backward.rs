//! Reverse-mode automatic differentiation.
//!
//! Gradients are written onto the nodes themselves. Leaf gradients add up
//! across passes until cleared with [`crate::optim::reset_grads`]; how
//! interior nodes combine contributions depends on the graph's
//! [`GradientPolicy`].

use std::collections::HashMap;

use tracing::{debug, debug_span, trace_span};

use crate::array::NdArray;
use crate::error::{GraphError, Result};
use crate::eval::raw_inputs;
use crate::graph::{Graph, GradientPolicy, NodeId, Operand};
use crate::tensor::Tensor;

/// Backpropagate from `root`.
///
/// A one-element root defaults the seed to ones. Any other root needs an
/// explicit `seed` of the same shape.
pub fn backward(root: Tensor<'_>, seed: Option<&NdArray>) -> Result<()> {
    let graph = root.graph();
    let shape = root.shape();
    let seed = match seed {
        Some(seed) => {
            if seed.shape() != &shape {
                return Err(GraphError::ShapeMismatch {
                    op: "backward",
                    lhs: shape,
                    rhs: seed.shape().clone(),
                });
            }
            seed.cast(root.dtype())
        }
        None if shape.is_scalar_like() => NdArray::ones(shape, root.dtype()),
        None => return Err(GraphError::SeedRequired { shape }),
    };

    let policy = graph.options().gradient_policy;
    let _span = debug_span!("backward", root = %root.id(), ?policy).entered();
    match policy {
        GradientPolicy::Accumulate => accumulate(graph, root.id(), seed),
        GradientPolicy::Overwrite => {
            graph.nodes_mut()[root.id().index].gradient = Some(seed);
            overwrite(graph, root.id())
        }
    }
}

/// Gradients of `id`'s operands given its upstream gradient, paired with the
/// operand ids that accept one.
fn operand_gradients(graph: &Graph, id: NodeId, upstream: &NdArray) -> Result<Vec<(NodeId, NdArray)>> {
    let nodes = graph.nodes();
    let node = &nodes[id.index];
    let Some(producer) = &node.producer else {
        return Ok(Vec::new());
    };

    let _span = trace_span!("grad", op = %producer.op, node = %id).entered();
    let inputs = raw_inputs(&nodes, &producer.inputs);
    let grads = producer
        .op
        .gradient(upstream, &inputs, &node.params, &node.value)?;

    let mut out = Vec::with_capacity(grads.len());
    for (operand, grad) in producer.inputs.iter().zip(grads) {
        let (Operand::Node(child), Some(grad)) = (operand, grad) else {
            continue;
        };
        if !nodes[child.index].track_grads {
            continue;
        }
        nodes[child.index].value.expect_same_shape(&grad, producer.op.name())?;
        out.push((*child, grad));
    }
    Ok(out)
}

/// Reverse topological sweep: every tracked node sums all consumer contributions.
fn accumulate(graph: &Graph, root: NodeId, seed: NdArray) -> Result<()> {
    let order = graph.topological_order(root);

    let mut adjoints: HashMap<NodeId, NdArray> = HashMap::new();
    adjoints.insert(root, seed);

    for &id in order.iter().rev() {
        let Some(upstream) = adjoints.get(&id).cloned() else {
            continue;
        };
        for (child, grad) in operand_gradients(graph, id, &upstream)? {
            match adjoints.get_mut(&child) {
                Some(existing) => existing.add_assign(&grad)?,
                None => {
                    adjoints.insert(child, grad);
                }
            }
        }
    }

    // interior gradients are replaced by this pass, leaf gradients add to it
    let mut nodes = graph.nodes_mut();
    let mut touched = 0usize;
    for id in order {
        let adjoint = adjoints.remove(&id);
        let node = &mut nodes[id.index];
        if id == root || !node.is_leaf() {
            node.gradient = adjoint.map(|g| g.cast(node.value.dtype()));
            continue;
        }
        if let Some(grad) = adjoint {
            touched += 1;
            match node.gradient.as_mut() {
                Some(existing) => existing.add_assign(&grad)?,
                None => node.gradient = Some(grad.cast(node.value.dtype())),
            }
        }
    }
    debug!(leaves = touched, "accumulated leaf gradients");
    Ok(())
}

/// Pre-order recursion: leaves accumulate, interior nodes take the latest
/// upstream gradient and are re-propagated once per consumer.
fn overwrite(graph: &Graph, id: NodeId) -> Result<()> {
    let Some(upstream) = graph.nodes()[id.index].gradient.clone() else {
        return Ok(());
    };

    for (child, grad) in operand_gradients(graph, id, &upstream)? {
        let is_leaf = {
            let mut nodes = graph.nodes_mut();
            let node = &mut nodes[child.index];
            let dtype = node.value.dtype();
            let grad = grad.cast(dtype);
            if node.is_leaf() {
                match node.gradient.as_mut() {
                    Some(existing) => existing.add_assign(&grad)?,
                    None => {
                        let mut zeros = NdArray::zeros(grad.shape().clone(), dtype);
                        zeros.add_assign(&grad)?;
                        node.gradient = Some(zeros);
                    }
                }
                true
            } else {
                node.gradient = Some(grad);
                false
            }
        };
        if !is_leaf {
            overwrite(graph, child)?;
        }
    }
    Ok(())
}

impl Tensor<'_> {
    /// Backpropagate from this tensor; see [`backward`].
    pub fn backward(&self, seed: Option<&NdArray>) -> Result<()> {
        backward(*self, seed)
    }
}
