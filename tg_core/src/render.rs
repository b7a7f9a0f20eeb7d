//! Text rendering of expression trees.

use crate::graph::{Graph, NodeId, Operand};
use crate::ops::{Format, Rendered};
use crate::tensor::Tensor;

/// Render `root` recursively: named nodes by name, nameless leaves by value,
/// operation nodes by their textual form.
pub fn render(root: Tensor<'_>, format: Format) -> String {
    render_node(root.graph(), root.id(), format).text
}

fn render_node(graph: &Graph, id: NodeId, format: Format) -> Rendered {
    let (name, producer, literal) = {
        let nodes = graph.nodes();
        let node = &nodes[id.index];
        let literal = node.producer.is_none().then(|| node.value.to_string());
        (node.name.clone(), node.producer.clone(), literal)
    };

    if let Some(name) = name {
        return Rendered {
            text: name,
            op: None,
        };
    }
    let Some(producer) = producer else {
        return Rendered {
            text: literal.unwrap_or_default(),
            op: None,
        };
    };

    let inputs: Vec<Rendered> = producer
        .inputs
        .iter()
        .map(|operand| match operand {
            Operand::Node(child) => render_node(graph, *child, format),
            Operand::Shape(shape) => Rendered {
                text: shape.to_string(),
                op: None,
            },
        })
        .collect();
    Rendered {
        text: producer.op.render(format, &inputs),
        op: Some(producer.op),
    }
}

impl Tensor<'_> {
    pub fn to_plain(&self) -> String {
        render(*self, Format::Plain)
    }

    pub fn to_latex(&self) -> String {
        render(*self, Format::Latex)
    }
}
