//! Re-evaluation of recorded graphs and forward-mode propagation.

use std::collections::HashMap;

use tracing::{debug_span, trace};

use crate::array::NdArray;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeId, Operand};
use crate::ops::Input;
use crate::tensor::Tensor;

/// Values for named placeholders, keyed by name.
pub type Env = HashMap<String, NdArray>;

/// Recompute every operation node below `root`, operands first.
///
/// Named leaves found in `env` take the supplied value; the shape must match
/// and the value is cast to the leaf's dtype. Other leaves are left as they
/// are. Nothing is cached, so a shared subexpression is recomputed once per
/// path that reaches it.
pub fn eval(root: Tensor<'_>, env: &Env) -> Result<NdArray> {
    let graph = root.graph();
    let _span = debug_span!("eval", root = %root.id(), vars = env.len()).entered();
    eval_node(graph, root.id(), env)?;
    Ok(root.value())
}

fn eval_node(graph: &Graph, id: NodeId, env: &Env) -> Result<()> {
    let (producer, name) = {
        let nodes = graph.nodes();
        let node = &nodes[id.index];
        (node.producer.clone(), node.name.clone())
    };

    let Some(producer) = producer else {
        if let Some(value) = name.as_ref().and_then(|n| env.get(n)) {
            trace!(node = %id, name = name.as_deref(), "bind placeholder");
            return graph
                .tensor(id)
                .ok_or_else(|| missing(id))?
                .set_value(value.clone());
        }
        return Ok(());
    };

    for operand in &producer.inputs {
        if let Operand::Node(child) = operand {
            eval_node(graph, *child, env)?;
        }
    }

    let (value, params) = {
        let nodes = graph.nodes();
        let inputs = raw_inputs(&nodes, &producer.inputs);
        producer.op.validate(&inputs)?;
        producer.op.evaluate(&inputs)?
    };
    let mut nodes = graph.nodes_mut();
    let node = &mut nodes[id.index];
    node.value = value;
    node.params = params;
    Ok(())
}

fn missing(id: NodeId) -> GraphError {
    GraphError::Consistency {
        message: format!("node {} does not belong to this graph", id),
    }
}

/// Raw arrays and shape parameters of a node's operands.
pub(crate) fn raw_inputs<'a>(nodes: &'a [crate::graph::Node], operands: &'a [Operand]) -> Vec<Input<'a>> {
    operands
        .iter()
        .map(|operand| match operand {
            Operand::Node(id) => Input::Array(&nodes[id.index].value),
            Operand::Shape(shape) => Input::Shape(shape),
        })
        .collect()
}

impl Graph {
    /// Forward-mode derivative of `root` for the given leaf tangents.
    ///
    /// Each op's tangent rule runs against the nodes' current values, so
    /// this is valid right after construction or after [`eval`]. Leaves
    /// without a seed have a zero tangent. Returns an array of `root`'s shape.
    pub fn jvp(&self, root: Tensor<'_>, seeds: &[(Tensor<'_>, NdArray)]) -> Result<NdArray> {
        let _span = debug_span!("jvp", root = %root.id(), seeds = seeds.len()).entered();
        self.check_owns("jvp", root.id())?;
        let mut tangents: HashMap<NodeId, Option<NdArray>> = HashMap::new();
        for (leaf, seed) in seeds {
            self.check_owns("jvp", leaf.id())?;
            if seed.shape() != &leaf.shape() {
                return Err(GraphError::ShapeMismatch {
                    op: "jvp",
                    lhs: leaf.shape(),
                    rhs: seed.shape().clone(),
                });
            }
            tangents.insert(leaf.id(), Some(seed.clone()));
        }

        for id in self.topological_order(root.id()) {
            if tangents.contains_key(&id) {
                continue;
            }
            let nodes = self.nodes();
            let node = &nodes[id.index];
            let tangent = match &node.producer {
                None => None,
                Some(producer) => {
                    let inputs = raw_inputs(&nodes, &producer.inputs);
                    let operand_tangents: Vec<Option<&NdArray>> = producer
                        .inputs
                        .iter()
                        .map(|operand| match operand {
                            Operand::Node(child) => tangents.get(child).and_then(Option::as_ref),
                            Operand::Shape(_) => None,
                        })
                        .collect();
                    producer
                        .op
                        .tangent(&inputs, &operand_tangents, &node.params, &node.value)?
                }
            };
            tangents.insert(id, tangent);
        }

        let out = tangents.remove(&root.id()).flatten();
        Ok(out.unwrap_or_else(|| NdArray::zeros(root.shape(), root.dtype())))
    }
}

impl<'g> Tensor<'g> {
    /// Re-evaluate this subtree; see [`eval`].
    pub fn eval(&self, env: &Env) -> Result<NdArray> {
        eval(*self, env)
    }

    /// Directional derivative of this tensor along every leaf named `var`,
    /// each seeded with ones.
    pub fn forward(&self, var: &str) -> Result<NdArray> {
        let graph = self.graph();
        let seeds: Vec<(Tensor<'g>, NdArray)> = graph
            .topological_order(self.id())
            .into_iter()
            .filter_map(|id| graph.tensor(id))
            .filter(|t| t.is_leaf() && t.name().as_deref() == Some(var))
            .map(|t| (t, NdArray::ones(t.shape(), t.dtype())))
            .collect();
        graph.jvp(*self, &seeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_eval_binds_placeholders() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let x = g.placeholder("x", NdArray::scalar(1.0));
        let y = g.placeholder("y", NdArray::scalar(1.0));
        let z = (x * y + x).unwrap();

        let env = Env::from([
            ("x".to_string(), NdArray::scalar(2.0)),
            ("y".to_string(), NdArray::scalar(3.0)),
        ]);
        assert_eq!(z.eval(&env).unwrap().as_slice(), &[8.0]);
        assert_eq!(x.value().as_slice(), &[2.0]);

        // unbound names keep their value
        assert_eq!(z.eval(&Env::new()).unwrap().as_slice(), &[8.0]);
    }

    #[test]
    fn test_eval_rejects_wrong_shape() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let x = g.placeholder("x", NdArray::scalar(1.0));
        let z = x.exp().unwrap();
        let env = Env::from([("x".to_string(), NdArray::from_vec(vec![1.0, 2.0]))]);
        assert!(z.eval(&env).unwrap_err().is_shape_error());
    }

    #[test]
    fn test_forward_mode() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let x = g.placeholder("x", NdArray::scalar(2.0));
        let y = g.placeholder("y", NdArray::scalar(3.0));
        let z = (x * y + x).unwrap();

        assert_eq!(z.forward("x").unwrap().as_slice(), &[4.0]);
        assert_eq!(z.forward("y").unwrap().as_slice(), &[2.0]);
        assert_eq!(z.forward("w").unwrap().as_slice(), &[0.0]);
    }

    #[test]
    fn test_jvp_rejects_nodes_of_other_graph() {
        let g1 = Graph::new();
        let g2 = Graph::new();
        let _recording = g2.track_computation();
        let a = g2.scalar(1.0);
        let b = g2.scalar(2.0);
        let root = ((a * b).unwrap() + a).unwrap();

        let err = g1.jvp(root, &[]).unwrap_err();
        assert!(matches!(err, GraphError::Consistency { .. }));

        let local = g1.scalar(3.0);
        let err = g1
            .jvp(local, &[(a, NdArray::scalar(1.0))])
            .unwrap_err();
        assert!(matches!(err, GraphError::Consistency { .. }));
    }

    #[test]
    fn test_forward_through_sin() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let x = g.placeholder("x", NdArray::from_vec(vec![0.0, 1.0]));
        let z = x.sin().unwrap();
        let d = z.forward("x").unwrap();
        assert_relative_eq!(d.as_slice()[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(d.as_slice()[1], 1f64.cos(), epsilon = 1e-6);
    }
}
