//! Error types for tg_core.

use thiserror::Error;

use crate::shape::Shape;

/// Errors raised while building, evaluating or differentiating a graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Operand shapes are incompatible for an operation.
    #[error("{op}: shapes {lhs} and {rhs} are not compatible")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// An operand has a shape the operation cannot accept.
    #[error("{op}: {message}")]
    InvalidShape { op: &'static str, message: String },

    /// Data length does not match the requested shape.
    #[error("shape {shape} expects {expected} elements, got {actual}")]
    DataLength {
        shape: Shape,
        expected: usize,
        actual: usize,
    },

    /// Backward on a non-scalar root was called without a seed gradient.
    #[error("backward from a root of shape {shape} needs an explicit seed gradient")]
    SeedRequired { shape: Shape },

    /// A value or parameter has the wrong kind (e.g. non-numeric literal).
    #[error("type error: {message}")]
    Type { message: String },

    /// Element or slice access outside the array.
    #[error("index {index:?} is out of bounds for shape {shape}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Shape },

    /// Nodes that cannot be combined, such as operands owned by different graphs.
    #[error("consistency error: {message}")]
    Consistency { message: String },

    /// Matrix inversion hit a singular matrix.
    #[error("{op}: matrix is singular")]
    SingularMatrix { op: &'static str },
}

impl GraphError {
    /// Whether this error belongs to the shape family.
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            GraphError::ShapeMismatch { .. }
                | GraphError::InvalidShape { .. }
                | GraphError::DataLength { .. }
                | GraphError::SeedRequired { .. }
        )
    }

    pub(crate) fn invalid_shape(op: &'static str, message: impl Into<String>) -> Self {
        GraphError::InvalidShape {
            op,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        GraphError::Type {
            message: message.into(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
