//! The node arena, operation dispatch and the recording context.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::array::{DType, NdArray};
use crate::error::{GraphError, Result};
use crate::ops::{Input, Op, Params};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Global counter for graph identities.
static GRAPH_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next_graph_id() -> usize {
    GRAPH_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Identifier of a node: the owning [`Graph`] plus the position in its arena.
///
/// Operands always have smaller indices than the nodes that consume them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) graph: usize,
    pub(crate) index: usize,
}

impl NodeId {
    /// Position of the node in its graph's arena.
    pub fn index(self) -> usize {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.index)
    }
}

/// One input of an operation node.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Node(NodeId),
    /// Plain shape parameter (target of expand or reshape).
    Shape(Shape),
}

/// The operation that produced a node together with its inputs.
#[derive(Debug, Clone)]
pub(crate) struct Producer {
    pub(crate) op: Op,
    pub(crate) inputs: Vec<Operand>,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) value: NdArray,
    pub(crate) gradient: Option<NdArray>,
    pub(crate) name: Option<String>,
    pub(crate) producer: Option<Producer>,
    pub(crate) params: Params,
    pub(crate) track_grads: bool,
}

impl Node {
    fn leaf(value: NdArray, track_grads: bool, name: Option<String>) -> Self {
        Node {
            value,
            gradient: None,
            name,
            producer: None,
            params: Params::None,
            track_grads,
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.producer.is_none()
    }

    /// Ids of the node operands, in order.
    pub(crate) fn node_inputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.producer
            .iter()
            .flat_map(|p| p.inputs.iter())
            .filter_map(|operand| match operand {
                Operand::Node(id) => Some(*id),
                Operand::Shape(_) => None,
            })
    }
}

/// How backward combines gradient contributions at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientPolicy {
    /// Every tracked node sums the contributions of all its consumers.
    #[default]
    Accumulate,
    /// Leaves accumulate; interior nodes keep only the last contribution
    /// and are re-propagated once per consumer.
    Overwrite,
}

/// Graph-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphOptions {
    /// Dtype of values the graph builds from plain numbers.
    pub default_dtype: DType,
    pub gradient_policy: GradientPolicy,
}

/// Arena owning every node of one computation graph.
///
/// Recording is off by default: operations on tracked tensors then produce
/// plain leaves. Turn it on with [`Graph::track_computation`].
pub struct Graph {
    id: usize,
    nodes: RefCell<Vec<Node>>,
    tracking: Cell<bool>,
    options: GraphOptions,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_options(GraphOptions::default())
    }

    pub fn with_options(options: GraphOptions) -> Self {
        Graph {
            id: next_graph_id(),
            nodes: RefCell::new(Vec::new()),
            tracking: Cell::new(false),
            options,
        }
    }

    pub fn options(&self) -> GraphOptions {
        self.options
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Handle to an existing node of this graph.
    pub fn tensor(&self, id: NodeId) -> Option<Tensor<'_>> {
        self.owns(id).then(|| Tensor::new(self, id))
    }

    /// Whether `id` names a node of this graph.
    pub fn owns(&self, id: NodeId) -> bool {
        id.graph == self.id && id.index < self.len()
    }

    pub(crate) fn check_owns(&self, op: &str, id: NodeId) -> Result<()> {
        if self.owns(id) {
            Ok(())
        } else {
            Err(GraphError::Consistency {
                message: format!("{}: node {} does not belong to this graph", op, id),
            })
        }
    }

    // === Leaf construction ===

    /// A leaf that receives gradients.
    pub fn array(&self, value: NdArray) -> Tensor<'_> {
        self.leaf(value, true, None)
    }

    /// A leaf that never receives gradients.
    pub fn constant(&self, value: NdArray) -> Tensor<'_> {
        self.leaf(value, false, None)
    }

    /// A named tracked leaf whose value can be replaced from an evaluation environment.
    pub fn placeholder(&self, name: &str, value: NdArray) -> Tensor<'_> {
        self.leaf(value, true, Some(name))
    }

    pub fn leaf(&self, value: NdArray, track_grads: bool, name: Option<&str>) -> Tensor<'_> {
        self.push(Node::leaf(value, track_grads, name.map(str::to_string)))
    }

    /// A tracked one-element leaf in the default dtype.
    pub fn scalar(&self, value: f64) -> Tensor<'_> {
        self.array(NdArray::full([1], value, self.options.default_dtype))
    }

    /// A tracked leaf parsed from a nested literal, in the default dtype.
    pub fn parse(&self, text: &str) -> Result<Tensor<'_>> {
        let value = NdArray::parse(text)?.cast(self.options.default_dtype);
        Ok(self.array(value))
    }

    fn push(&self, node: Node) -> Tensor<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId {
            graph: self.id,
            index: nodes.len(),
        };
        nodes.push(node);
        Tensor::new(self, id)
    }

    // === Recording context ===

    /// Whether operations currently record producer links.
    pub fn is_tracking(&self) -> bool {
        self.tracking.get()
    }

    /// Turn recording on until the returned guard is dropped.
    ///
    /// The previous state is restored on drop, including during unwinding.
    pub fn track_computation(&self) -> Recording<'_> {
        let previous = self.tracking.replace(true);
        Recording {
            graph: self,
            previous,
        }
    }

    /// Run `f` with recording on.
    pub fn with_tracking<R>(&self, f: impl FnOnce() -> R) -> R {
        let _recording = self.track_computation();
        f()
    }

    // === Dispatch ===

    /// Validate and evaluate `op` on `operands`, then append the result node.
    ///
    /// The result is untracked when no operand is tracked, a tracked leaf
    /// without a producer when recording is off, and a full operation node
    /// otherwise. A failed validation leaves the arena unchanged.
    pub fn apply(&self, op: Op, operands: &[Operand]) -> Result<Tensor<'_>> {
        let (value, params, tracked) = {
            let nodes = self.nodes.borrow();
            let mut tracked = false;
            let mut inputs = Vec::with_capacity(operands.len());
            for operand in operands {
                match operand {
                    Operand::Node(id) => {
                        if id.graph != self.id || id.index >= nodes.len() {
                            return Err(GraphError::Consistency {
                                message: format!("{}: node {} does not belong to this graph", op, id),
                            });
                        }
                        let node = &nodes[id.index];
                        tracked |= node.track_grads;
                        inputs.push(Input::Array(&node.value));
                    }
                    Operand::Shape(shape) => inputs.push(Input::Shape(shape)),
                }
            }
            op.validate(&inputs)?;
            let (value, params) = op.evaluate(&inputs)?;
            (value, params, tracked)
        };

        let recorded = tracked && self.is_tracking();
        let node = if recorded {
            Node {
                producer: Some(Producer {
                    op,
                    inputs: operands.to_vec(),
                }),
                params,
                ..Node::leaf(value, true, None)
            }
        } else {
            Node::leaf(value, tracked, None)
        };
        let result = self.push(node);
        trace!(op = %op, node = %result.id(), tracked, recorded, "apply");
        Ok(result)
    }

    // === Crate-internal access ===

    pub(crate) fn nodes(&self) -> Ref<'_, Vec<Node>> {
        self.nodes.borrow()
    }

    pub(crate) fn nodes_mut(&self) -> RefMut<'_, Vec<Node>> {
        self.nodes.borrow_mut()
    }

    /// Every node reachable from `root` through producer links, operands
    /// before consumers, each once.
    pub(crate) fn topological_order(&self, root: NodeId) -> Vec<NodeId> {
        let nodes = self.nodes();
        let mut visited = HashSet::new();
        let mut order = Vec::new();

        fn dfs(nodes: &[Node], id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
            if !visited.insert(id) {
                return;
            }
            for child in nodes[id.index].node_inputs() {
                dfs(nodes, child, visited, order);
            }
            order.push(id);
        }

        dfs(&nodes, root, &mut visited, &mut order);
        order
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.len())
            .field("tracking", &self.is_tracking())
            .field("options", &self.options)
            .finish()
    }
}

/// Guard returned by [`Graph::track_computation`].
#[must_use = "recording stops as soon as the guard is dropped"]
pub struct Recording<'g> {
    graph: &'g Graph,
    previous: bool,
}

impl Drop for Recording<'_> {
    fn drop(&mut self) {
        self.graph.tracking.set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec1(v: f64) -> NdArray {
        NdArray::scalar(v)
    }

    #[test]
    fn test_recording_guard_nests() {
        let g = Graph::new();
        assert!(!g.is_tracking());
        {
            let _outer = g.track_computation();
            assert!(g.is_tracking());
            {
                let _inner = g.track_computation();
                assert!(g.is_tracking());
            }
            assert!(g.is_tracking());
        }
        assert!(!g.is_tracking());
    }

    #[test]
    fn test_apply_three_outcomes() {
        let g = Graph::new();
        let c = g.constant(vec1(1.0));
        let x = g.array(vec1(2.0));

        let detached = g
            .apply(Op::Add, &[Operand::Node(c.id()), Operand::Node(c.id())])
            .unwrap();
        assert!(!detached.track_grads());
        assert!(detached.is_leaf());

        let unrecorded = g
            .apply(Op::Add, &[Operand::Node(x.id()), Operand::Node(c.id())])
            .unwrap();
        assert!(unrecorded.track_grads());
        assert!(unrecorded.is_leaf());

        let _recording = g.track_computation();
        let recorded = g
            .apply(Op::Add, &[Operand::Node(x.id()), Operand::Node(c.id())])
            .unwrap();
        assert!(recorded.track_grads());
        assert_eq!(recorded.operation(), Some(Op::Add));
        assert_eq!(recorded.value().as_slice(), &[3.0]);
    }

    #[test]
    fn test_failed_validation_adds_no_node() {
        let g = Graph::new();
        let a = g.array(NdArray::from_vec(vec![1.0, 2.0]));
        let b = g.array(NdArray::from_vec(vec![1.0, 2.0, 3.0]));
        let before = g.len();
        assert!(g
            .apply(Op::Add, &[Operand::Node(a.id()), Operand::Node(b.id())])
            .is_err());
        assert_eq!(g.len(), before);
    }

    #[test]
    fn test_unknown_node_is_consistency_error() {
        let g = Graph::new();
        let err = g
            .apply(Op::Exp, &[Operand::Node(NodeId { graph: g.id, index: 7 })])
            .unwrap_err();
        assert!(matches!(err, GraphError::Consistency { .. }));
    }

    #[test]
    fn test_node_from_other_graph_is_rejected() {
        let g1 = Graph::new();
        g1.array(vec1(1.0));
        g1.array(vec1(5.0));
        let g2 = Graph::new();
        let foreign = g2.array(vec1(100.0));

        let before = g1.len();
        let err = g1
            .apply(Op::Exp, &[Operand::Node(foreign.id())])
            .unwrap_err();
        assert!(matches!(err, GraphError::Consistency { .. }));
        assert_eq!(g1.len(), before);

        assert!(g1.tensor(foreign.id()).is_none());
        assert!(!g1.owns(foreign.id()));
        assert!(g2.owns(foreign.id()));
    }

    #[test]
    fn test_topological_order_dedups() {
        let g = Graph::new();
        let _recording = g.track_computation();
        let x = g.array(vec1(2.0));
        let y = g
            .apply(Op::Mul, &[Operand::Node(x.id()), Operand::Node(x.id())])
            .unwrap();
        let order = g.topological_order(y.id());
        assert_eq!(order, vec![x.id(), y.id()]);
    }
}
