//! Dense n-dimensional arrays and the CPU kernels the operation catalog runs on.

use std::fmt;
use std::ops::Range;

use crate::error::{GraphError, Result};
use crate::shape::{Indices, Shape};

/// Element type of an array.
///
/// Storage is always `f64`; `F32` rounds every stored element through `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    #[default]
    F32,
    F64,
}

impl DType {
    /// Cast a single element to this dtype.
    pub fn cast(self, v: f64) -> f64 {
        match self {
            DType::F32 => v as f32 as f64,
            DType::F64 => v,
        }
    }

    /// Result dtype of combining two operands.
    pub fn promote(self, other: DType) -> DType {
        if self == DType::F64 || other == DType::F64 {
            DType::F64
        } else {
            DType::F32
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row-major n-dimensional array with a fixed shape and dtype.
#[derive(Clone, PartialEq)]
pub struct NdArray {
    shape: Shape,
    data: Vec<f64>,
    dtype: DType,
}

impl NdArray {
    /// Create a `float32` array from a shape and flat row-major data.
    pub fn new(shape: impl Into<Shape>, data: Vec<f64>) -> Result<Self> {
        Self::with_dtype(shape, data, DType::F32)
    }

    /// Create an array with an explicit dtype.
    pub fn with_dtype(shape: impl Into<Shape>, data: Vec<f64>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        if shape.numel() != data.len() {
            return Err(GraphError::DataLength {
                expected: shape.numel(),
                actual: data.len(),
                shape,
            });
        }
        Ok(Self::from_parts(shape, data, dtype))
    }

    /// Build from parts already known to agree; applies the dtype cast.
    pub(crate) fn from_parts(shape: Shape, mut data: Vec<f64>, dtype: DType) -> Self {
        debug_assert_eq!(shape.numel(), data.len());
        if dtype == DType::F32 {
            for v in &mut data {
                *v = DType::F32.cast(*v);
            }
        }
        NdArray { shape, data, dtype }
    }

    /// A one-dimensional `float32` array.
    pub fn from_vec(data: Vec<f64>) -> Self {
        let shape = Shape::new(vec![data.len()]);
        Self::from_parts(shape, data, DType::F32)
    }

    /// A one-element `float32` array of shape `[1]`.
    pub fn scalar(value: f64) -> Self {
        Self::from_parts(Shape::scalar(), vec![value], DType::F32)
    }

    pub fn full(shape: impl Into<Shape>, value: f64, dtype: DType) -> Self {
        let shape = shape.into();
        let data = vec![value; shape.numel()];
        Self::from_parts(shape, data, dtype)
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 0.0, dtype)
    }

    pub fn ones(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 1.0, dtype)
    }

    /// Parse a nested literal such as `[[1, 2], [3, 4.5]]` into a `float32` array.
    ///
    /// Non-numeric elements are a type error; ragged nesting is a shape error.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text);
        let mut pos = 0;
        let literal = parse_literal(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err(GraphError::type_error("trailing input after array literal"));
        }
        let mut dims = Vec::new();
        literal_shape(&literal, &mut dims);
        let mut data = Vec::new();
        flatten_literal(&literal, &dims, 0, &mut data)?;
        Ok(Self::from_parts(Shape::new(dims), data, DType::F32))
    }

    // === Accessors ===

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn is_scalar_like(&self) -> bool {
        self.shape.is_scalar_like()
    }

    /// The single element of a scalar-like array.
    pub fn item(&self) -> Result<f64> {
        if !self.is_scalar_like() {
            return Err(GraphError::invalid_shape(
                "item",
                format!("array of shape {} has more than one element", self.shape),
            ));
        }
        Ok(self.data[0])
    }

    /// Read one element.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        let offset = self.shape.offset(index)?;
        Ok(self.data[offset])
    }

    /// Write one element in place, cast to this array's dtype.
    pub fn set(&mut self, index: &[usize], value: f64) -> Result<()> {
        let offset = self.shape.offset(index)?;
        self.data[offset] = self.dtype.cast(value);
        Ok(())
    }

    /// Copy out a sub-array. `ranges` covers the leading axes; the remaining
    /// axes are taken whole.
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<NdArray> {
        let out_of_bounds = || GraphError::IndexOutOfBounds {
            index: ranges.iter().map(|r| r.end).collect(),
            shape: self.shape.clone(),
        };
        if ranges.len() > self.ndim() {
            return Err(out_of_bounds());
        }
        let mut full: Vec<Range<usize>> = ranges.to_vec();
        for axis in ranges.len()..self.ndim() {
            full.push(0..self.shape.dim(axis));
        }
        if full
            .iter()
            .zip(self.shape.dims())
            .any(|(r, &d)| r.start > r.end || r.end > d)
        {
            return Err(out_of_bounds());
        }

        let out_shape = Shape::new(full.iter().map(|r| r.end - r.start).collect());
        let strides = self.shape.contiguous_strides();
        let data = Indices::new(&out_shape)
            .map(|idx| {
                let src: Vec<usize> = idx.iter().zip(&full).map(|(i, r)| i + r.start).collect();
                self.data[strides.index(&src)]
            })
            .collect();
        Ok(Self::from_parts(out_shape, data, self.dtype))
    }

    /// Same data under another dtype.
    pub fn cast(&self, dtype: DType) -> NdArray {
        Self::from_parts(self.shape.clone(), self.data.clone(), dtype)
    }

    /// Same data under another shape with the same element count.
    pub fn reshape(&self, shape: &Shape) -> Result<NdArray> {
        if shape.numel() != self.numel() {
            return Err(GraphError::ShapeMismatch {
                op: "reshape",
                lhs: self.shape.clone(),
                rhs: shape.clone(),
            });
        }
        Ok(NdArray {
            shape: shape.clone(),
            data: self.data.clone(),
            dtype: self.dtype,
        })
    }

    // === Element-wise kernels ===

    pub fn map(&self, f: impl Fn(f64) -> f64) -> NdArray {
        let data = self.data.iter().map(|&v| f(v)).collect();
        Self::from_parts(self.shape.clone(), data, self.dtype)
    }

    /// Combine two equal-shaped arrays element by element.
    pub fn zip_map(
        &self,
        other: &NdArray,
        op: &'static str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<NdArray> {
        self.expect_same_shape(other, op)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Self::from_parts(
            self.shape.clone(),
            data,
            self.dtype.promote(other.dtype),
        ))
    }

    pub fn add(&self, other: &NdArray) -> Result<NdArray> {
        self.zip_map(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &NdArray) -> Result<NdArray> {
        self.zip_map(other, "sub", |a, b| a - b)
    }

    pub fn mul(&self, other: &NdArray) -> Result<NdArray> {
        self.zip_map(other, "mul", |a, b| a * b)
    }

    pub fn div(&self, other: &NdArray) -> Result<NdArray> {
        self.zip_map(other, "div", |a, b| a / b)
    }

    pub fn neg(&self) -> NdArray {
        self.map(|v| -v)
    }

    pub fn scale(&self, k: f64) -> NdArray {
        self.map(|v| v * k)
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// `self += other` for gradient accumulation.
    pub fn add_assign(&mut self, other: &NdArray) -> Result<()> {
        self.expect_same_shape(other, "accumulate")?;
        for (d, s) in self.data.iter_mut().zip(other.data.iter()) {
            *d = self.dtype.cast(*d + s);
        }
        Ok(())
    }

    pub(crate) fn expect_same_shape(&self, other: &NdArray, op: &'static str) -> Result<()> {
        if self.shape != other.shape {
            return Err(GraphError::ShapeMismatch {
                op,
                lhs: self.shape.clone(),
                rhs: other.shape.clone(),
            });
        }
        Ok(())
    }

    // === Structural kernels ===

    /// Reverse the order of all axes.
    pub fn transpose(&self) -> NdArray {
        if self.ndim() == 1 {
            return self.clone();
        }
        let new_shape = self.shape.reversed();
        let dst_strides = new_shape.contiguous_strides();
        let mut data = vec![0.0; self.numel()];
        for (src_flat, idx) in Indices::new(&self.shape).enumerate() {
            let rev: Vec<usize> = idx.iter().rev().copied().collect();
            data[dst_strides.index(&rev)] = self.data[src_flat];
        }
        NdArray {
            shape: new_shape,
            data,
            dtype: self.dtype,
        }
    }

    /// Matrix product of two 2-D arrays: `(m, k) @ (k, n) -> (m, n)`.
    pub fn matmul(&self, other: &NdArray) -> Result<NdArray> {
        let (m, k) = self.matrix_dims("matmul")?;
        let (k2, n) = other.matrix_dims("matmul")?;
        if k != k2 {
            return Err(GraphError::ShapeMismatch {
                op: "matmul",
                lhs: self.shape.clone(),
                rhs: other.shape.clone(),
            });
        }
        let data = matmul_raw(&self.data, &other.data, m, k, n);
        Ok(Self::from_parts(
            Shape::new(vec![m, n]),
            data,
            self.dtype.promote(other.dtype),
        ))
    }

    fn matrix_dims(&self, op: &'static str) -> Result<(usize, usize)> {
        if self.ndim() != 2 {
            return Err(GraphError::invalid_shape(
                op,
                format!("expected a 2-D matrix, got shape {}", self.shape),
            ));
        }
        Ok((self.shape.dim(0), self.shape.dim(1)))
    }

    /// Number of `n x n` matrices stacked along the leading axes and `n`.
    pub(crate) fn square_batch(&self, op: &'static str) -> Result<(usize, usize)> {
        let nd = self.ndim();
        if nd < 2 || self.shape.dim(nd - 1) != self.shape.dim(nd - 2) {
            return Err(GraphError::invalid_shape(
                op,
                format!("expected square matrices, got shape {}", self.shape),
            ));
        }
        let n = self.shape.dim(nd - 1);
        Ok((self.numel() / (n * n).max(1), n))
    }

    /// Inverse of every square matrix along the last two axes.
    pub fn inverse(&self) -> Result<NdArray> {
        let (batch, n) = self.square_batch("inv")?;
        let mut data = Vec::with_capacity(self.numel());
        for b in 0..batch {
            let block = &self.data[b * n * n..(b + 1) * n * n];
            data.extend(invert_raw(block, n).ok_or(GraphError::SingularMatrix { op: "inv" })?);
        }
        Ok(Self::from_parts(self.shape.clone(), data, self.dtype))
    }
}

/// `(m, k) @ (k, n)` on flat row-major buffers.
pub(crate) fn matmul_raw(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for l in 0..k {
            let a_il = a[i * k + l];
            for j in 0..n {
                out[i * n + j] += a_il * b[l * n + j];
            }
        }
    }
    out
}

/// Transpose of a flat row-major `(rows, cols)` matrix.
pub(crate) fn transpose_raw(a: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    let mut out = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = a[i * cols + j];
        }
    }
    out
}

/// Gauss-Jordan elimination with partial pivoting. `None` when singular.
fn invert_raw(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut work = a.to_vec();
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        inv[i * n + i] = 1.0;
    }

    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| {
            work[r1 * n + col]
                .abs()
                .total_cmp(&work[r2 * n + col].abs())
        })?;
        if work[pivot * n + col].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for j in 0..n {
                work.swap(pivot * n + j, col * n + j);
                inv.swap(pivot * n + j, col * n + j);
            }
        }

        let p = work[col * n + col];
        for j in 0..n {
            work[col * n + j] /= p;
            inv[col * n + j] /= p;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[row * n + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                work[row * n + j] -= factor * work[col * n + j];
                inv[row * n + j] -= factor * inv[col * n + j];
            }
        }
    }

    Some(inv)
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NdArray({}, shape={}, dtype={})", self, self.shape, self.dtype)
    }
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_axis(
            f: &mut fmt::Formatter<'_>,
            data: &[f64],
            dims: &[usize],
        ) -> fmt::Result {
            write!(f, "[")?;
            if dims.len() == 1 {
                for (i, v) in data.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", v)?;
                }
            } else {
                let chunk = dims[1..].iter().product::<usize>().max(1);
                for i in 0..dims[0] {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_axis(f, &data[i * chunk..(i + 1) * chunk], &dims[1..])?;
                }
            }
            write!(f, "]")
        }
        write_axis(f, &self.data, self.shape.dims())
    }
}

// === Literal parsing ===

enum Literal {
    Num(f64),
    List(Vec<Literal>),
}

#[derive(Debug, PartialEq)]
enum Token {
    Open,
    Close,
    Comma,
    Atom(String),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut atom = String::new();
    let flush = |atom: &mut String, tokens: &mut Vec<Token>| {
        if !atom.is_empty() {
            tokens.push(Token::Atom(std::mem::take(atom)));
        }
    };
    for c in text.chars() {
        match c {
            '[' | ']' | ',' => {
                flush(&mut atom, &mut tokens);
                tokens.push(match c {
                    '[' => Token::Open,
                    ']' => Token::Close,
                    _ => Token::Comma,
                });
            }
            c if c.is_whitespace() => flush(&mut atom, &mut tokens),
            c => atom.push(c),
        }
    }
    flush(&mut atom, &mut tokens);
    tokens
}

fn parse_literal(tokens: &[Token], pos: &mut usize) -> Result<Literal> {
    match tokens.get(*pos) {
        Some(Token::Atom(text)) => {
            *pos += 1;
            text.parse::<f64>()
                .map(Literal::Num)
                .map_err(|_| GraphError::type_error(format!("value `{}` is not numeric", text)))
        }
        Some(Token::Open) => {
            *pos += 1;
            let mut items = Vec::new();
            if tokens.get(*pos) == Some(&Token::Close) {
                *pos += 1;
                return Ok(Literal::List(items));
            }
            loop {
                items.push(parse_literal(tokens, pos)?);
                match tokens.get(*pos) {
                    Some(Token::Comma) => *pos += 1,
                    Some(Token::Close) => {
                        *pos += 1;
                        return Ok(Literal::List(items));
                    }
                    _ => return Err(GraphError::type_error("expected `,` or `]` in array literal")),
                }
            }
        }
        _ => Err(GraphError::type_error("expected a number or `[`")),
    }
}

fn literal_shape(literal: &Literal, dims: &mut Vec<usize>) {
    if let Literal::List(items) = literal {
        dims.push(items.len());
        if let Some(first) = items.first() {
            literal_shape(first, dims);
        }
    }
}

fn flatten_literal(literal: &Literal, dims: &[usize], depth: usize, out: &mut Vec<f64>) -> Result<()> {
    let ragged = || GraphError::invalid_shape("parse", "ragged array literal");
    match literal {
        Literal::Num(v) if depth == dims.len() => {
            out.push(*v);
            Ok(())
        }
        Literal::List(items) if depth < dims.len() && items.len() == dims[depth] => {
            for item in items {
                flatten_literal(item, dims, depth + 1, out)?;
            }
            Ok(())
        }
        _ => Err(ragged()),
    }
}
