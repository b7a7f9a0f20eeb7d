//! Shape and stride utilities for arrays.

use std::fmt;

use crate::error::{GraphError, Result};

/// An array shape (dimensions).
///
/// Arrays are always at least one-dimensional: an empty dimension list is
/// normalised to `[1]`, which is also the shape of a scalar.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        if dims.is_empty() {
            Shape(vec![1])
        } else {
            Shape(dims)
        }
    }

    /// The one-element scalar shape `[1]`.
    pub fn scalar() -> Self {
        Shape(vec![1])
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Get dimension at index.
    pub fn dim(&self, idx: usize) -> usize {
        self.0[idx]
    }

    /// Get dimensions as slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// A shape holding exactly one element, whatever its rank.
    pub fn is_scalar_like(&self) -> bool {
        self.numel() == 1
    }

    /// Compute row-major (C-contiguous) strides for this shape.
    pub fn contiguous_strides(&self) -> Strides {
        let ndim = self.0.len();
        let mut strides = vec![1usize; ndim];
        for i in (0..ndim.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        Strides(strides)
    }

    /// Flat row-major offset of `index`, checked against the bounds.
    pub fn offset(&self, index: &[usize]) -> Result<usize> {
        let in_bounds = index.len() == self.ndim()
            && index.iter().zip(self.0.iter()).all(|(&i, &d)| i < d);
        if !in_bounds {
            return Err(GraphError::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.clone(),
            });
        }
        Ok(self.contiguous_strides().index(index))
    }

    /// Shape with the reversed axis order.
    pub fn reversed(&self) -> Shape {
        Shape(self.0.iter().rev().copied().collect())
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape::new(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape::new(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(s: [usize; N]) -> Self {
        Shape::new(s.to_vec())
    }
}

/// Array strides (step size in each dimension).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Strides(pub Vec<usize>);

impl Strides {
    /// Compute flat index from multi-dimensional indices.
    pub fn index(&self, indices: &[usize]) -> usize {
        debug_assert_eq!(self.0.len(), indices.len());
        self.0.iter().zip(indices.iter()).map(|(s, i)| s * i).sum()
    }
}

/// Odometer over every multi-dimensional index of a shape, row-major.
pub(crate) struct Indices<'a> {
    shape: &'a Shape,
    current: Vec<usize>,
    done: bool,
}

impl<'a> Indices<'a> {
    pub(crate) fn new(shape: &'a Shape) -> Self {
        Indices {
            shape,
            current: vec![0; shape.ndim()],
            done: shape.numel() == 0,
        }
    }
}

impl Iterator for Indices<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current.clone();

        // rightmost axis first
        let mut i = self.shape.ndim() - 1;
        loop {
            self.current[i] += 1;
            if self.current[i] < self.shape.dim(i) {
                break;
            }
            self.current[i] = 0;
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.dim(0), 2);
        assert_eq!(s.dim(2), 4);
        assert_eq!(s.numel(), 24);
        assert!(!s.is_scalar_like());
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.dims(), &[1]);
        assert!(s.is_scalar_like());
        assert_eq!(Shape::new(vec![]), Shape::scalar());
        assert!(Shape::new(vec![1, 1]).is_scalar_like());
    }

    #[test]
    fn test_contiguous_strides() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.contiguous_strides().0, vec![12, 4, 1]);

        let s2 = Shape::new(vec![5]);
        assert_eq!(s2.contiguous_strides().0, vec![1]);
    }

    #[test]
    fn test_offset_bounds() {
        let s = Shape::new(vec![2, 3]);
        assert_eq!(s.offset(&[1, 2]).unwrap(), 5);
        assert!(matches!(
            s.offset(&[2, 0]),
            Err(GraphError::IndexOutOfBounds { .. })
        ));
        assert!(s.offset(&[1]).is_err());
    }

    #[test]
    fn test_indices_row_major() {
        let s = Shape::new(vec![2, 2]);
        let all: Vec<Vec<usize>> = Indices::new(&s).collect();
        assert_eq!(all, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(vec![3]).to_string(), "(3,)");
        assert_eq!(Shape::new(vec![2, 3]).to_string(), "(2, 3)");
    }
}
