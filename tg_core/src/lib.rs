//! # tg_core - Tensor Computation Graph with Autodiff
//!
//! This crate builds arithmetic expressions over n-dimensional arrays as a
//! directed graph, re-evaluates them, and differentiates them in forward or
//! reverse mode.
//!
//! ## Overview
//!
//! The core abstractions are:
//! - [`NdArray`] and [`Shape`] - dense row-major arrays (`float32` by default)
//! - [`Graph`] - the arena that owns every node and the recording switch
//! - [`Tensor`] - a `Copy` handle to one node, with operator overloads
//! - [`Op`] - the closed catalog of operations
//!
//! Operations are only linked into the graph while recording is on. Outside
//! a [`Graph::track_computation`] scope they still compute their value, but
//! the result is a leaf.
//!
//! ## Example
//!
//! ```
//! use tg_core::prelude::*;
//!
//! let graph = Graph::new();
//! let _recording = graph.track_computation();
//!
//! let x = graph.placeholder("x", NdArray::scalar(2.0));
//! let y = graph.placeholder("y", NdArray::scalar(3.0));
//! let z = (x * y + x).unwrap();
//!
//! z.backward(None).unwrap();
//! assert_eq!(z.value().as_slice(), &[8.0]);
//! assert_eq!(x.gradient().unwrap().as_slice(), &[4.0]);
//! assert_eq!(y.gradient().unwrap().as_slice(), &[2.0]);
//! ```

pub mod array;
pub mod backward;
pub mod broadcast;
pub mod error;
pub mod eval;
pub mod finite_diff;
pub mod functional;
pub mod graph;
pub mod ops;
pub mod optim;
pub mod render;
pub mod shape;
pub mod tensor;

pub use array::{DType, NdArray};
pub use error::{GraphError, Result};
pub use eval::Env;
pub use finite_diff::{finite_diff_grad, max_grad_error};
pub use graph::{GradientPolicy, Graph, GraphOptions, NodeId, Operand, Recording};
pub use ops::{Format, Op};
pub use optim::{apply_grads, reset_grads, Sgd};
pub use shape::{Shape, Strides};
pub use tensor::Tensor;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::array::{DType, NdArray};
    pub use crate::error::{GraphError, Result};
    pub use crate::eval::Env;
    pub use crate::functional::*;
    pub use crate::graph::{GradientPolicy, Graph, GraphOptions, NodeId, Operand};
    pub use crate::ops::Op;
    pub use crate::optim::{apply_grads, reset_grads, Sgd};
    pub use crate::shape::Shape;
    pub use crate::tensor::Tensor;
}
