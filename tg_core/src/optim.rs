//! Parameter updates driven by the gradients stored on leaves.

use std::collections::HashMap;

use tracing::debug;

use crate::array::NdArray;
use crate::error::Result;
use crate::graph::NodeId;
use crate::tensor::Tensor;

/// Tracked leaves reachable from `root`, each once.
fn tracked_leaves<'g>(root: Tensor<'g>) -> Vec<Tensor<'g>> {
    let graph = root.graph();
    graph
        .topological_order(root.id())
        .into_iter()
        .filter_map(|id| graph.tensor(id))
        .filter(|t| t.is_leaf() && t.track_grads())
        .collect()
}

/// `value -= lr * gradient` for every tracked leaf under `root` that has a gradient.
pub fn apply_grads(root: Tensor<'_>, lr: f64) -> Result<()> {
    let mut updated = 0usize;
    for leaf in tracked_leaves(root) {
        let Some(grad) = leaf.gradient() else {
            continue;
        };
        leaf.set_value(leaf.value().sub(&grad.scale(lr))?)?;
        updated += 1;
    }
    debug!(root = %root.id(), updated, lr, "apply_grads");
    Ok(())
}

/// Clear every gradient in the subtree under `root`.
pub fn reset_grads(root: Tensor<'_>) {
    let graph = root.graph();
    let order = graph.topological_order(root.id());
    let mut nodes = graph.nodes_mut();
    for id in &order {
        nodes[id.index].gradient = None;
    }
    debug!(root = %root.id(), nodes = order.len(), "reset_grads");
}

/// Stochastic gradient descent with optional momentum.
///
/// Velocity buffers are keyed by node id, which stays stable for the life
/// of the graph.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub lr: f64,
    pub momentum: f64,
    velocities: HashMap<NodeId, NdArray>,
}

impl Sgd {
    pub fn new(lr: f64) -> Self {
        Self::with_momentum(lr, 0.0)
    }

    pub fn with_momentum(lr: f64, momentum: f64) -> Self {
        Sgd {
            lr,
            momentum,
            velocities: HashMap::new(),
        }
    }

    /// Update every tracked leaf under `root` from its gradient.
    ///
    /// With momentum: `v = momentum * v + grad; value -= lr * v`.
    pub fn step(&mut self, root: Tensor<'_>) -> Result<()> {
        for leaf in tracked_leaves(root) {
            let Some(grad) = leaf.gradient() else {
                continue;
            };
            let direction = if self.momentum > 0.0 {
                let velocity = match self.velocities.remove(&leaf.id()) {
                    Some(v) => v.scale(self.momentum).add(&grad)?,
                    None => grad,
                };
                self.velocities.insert(leaf.id(), velocity.clone());
                velocity
            } else {
                grad
            };
            leaf.set_value(leaf.value().sub(&direction.scale(self.lr))?)?;
        }
        debug!(root = %root.id(), lr = self.lr, momentum = self.momentum, "sgd step");
        Ok(())
    }

    /// Drop all velocity buffers.
    pub fn reset(&mut self) {
        self.velocities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;
    use crate::graph::Graph;
    use approx::assert_relative_eq;

    fn vec64(data: &[f64]) -> NdArray {
        NdArray::with_dtype([data.len()], data.to_vec(), DType::F64).unwrap()
    }

    #[test]
    fn test_apply_and_reset_grads() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let w = g.array(vec64(&[1.0, 2.0, 3.0]));
        let c = g.constant(vec64(&[1.0, 1.0, 1.0]));
        let loss = w.mse(c).unwrap();
        loss.backward(None).unwrap();

        // d/dw = 2 (w - c) / 3
        apply_grads(loss, 0.75).unwrap();
        let v = w.value();
        assert_relative_eq!(v.as_slice()[0], 1.0);
        assert_relative_eq!(v.as_slice()[1], 1.5);
        assert_relative_eq!(v.as_slice()[2], 2.0);
        assert_eq!(c.value().as_slice(), &[1.0, 1.0, 1.0]);

        reset_grads(loss);
        assert!(w.gradient().is_none());
        assert!(loss.gradient().is_none());
    }

    #[test]
    fn test_shared_leaf_updated_once() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let x = g.array(vec64(&[2.0]));
        let z = (x * x).unwrap();
        z.backward(None).unwrap();
        apply_grads(z, 0.1).unwrap();
        assert_relative_eq!(x.value().as_slice()[0], 2.0 - 0.1 * 4.0);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let w = g.array(vec64(&[1.0]));
        let z = (w * 1.0).unwrap();
        let mut opt = Sgd::with_momentum(0.1, 0.9);

        // v = 1, w = 1 - 0.1
        z.backward(None).unwrap();
        opt.step(z).unwrap();
        assert_relative_eq!(w.value().as_slice()[0], 0.9, epsilon = 1e-12);

        // v = 0.9 * 1 + 1 = 1.9, w = 0.9 - 0.19
        reset_grads(z);
        z.backward(None).unwrap();
        opt.step(z).unwrap();
        assert_relative_eq!(w.value().as_slice()[0], 0.71, epsilon = 1e-12);

        // after a reset the velocity starts from the gradient again
        opt.reset();
        reset_grads(z);
        z.backward(None).unwrap();
        opt.step(z).unwrap();
        assert_relative_eq!(w.value().as_slice()[0], 0.61, epsilon = 1e-12);
    }

    #[test]
    fn test_plain_sgd_matches_apply_grads() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let w = g.array(vec64(&[1.0, 2.0, 3.0]));
        let c = g.constant(vec64(&[1.0, 1.0, 1.0]));
        let loss = w.mse(c).unwrap();
        let mut opt = Sgd::new(0.75);
        assert_eq!(opt.momentum, 0.0);

        loss.backward(None).unwrap();
        opt.step(loss).unwrap();
        let v = w.value();
        assert_relative_eq!(v.as_slice()[1], 1.5);
        assert_relative_eq!(v.as_slice()[2], 2.0);
        assert!(opt.velocities.is_empty());
    }
}
