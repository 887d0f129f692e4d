use crate::math::Matrix;

/// N-dimensional tensor backed by a flat `Vec<f32>`.
///
/// The tensor stores its shape explicitly. The recurrent layers compute on
/// 2-D [`Matrix`] values one time step (or one layer) at a time; the results
/// handed to callers are assembled into rank-3 tensors such as
/// `(batch, time, features)` or `(layers, batch, hidden)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Tensor elements in row-major order.
    pub data: Vec<f32>,
    /// Sizes for each dimension.
    pub shape: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor from raw parts.  The number of elements in `data`
    /// must match the product of the requested `shape`.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        assert_eq!(data.len(), shape.iter().product::<usize>());
        Tensor { data, shape }
    }

    /// Stack equally shaped matrices along a new leading axis, producing a
    /// `(n, rows, cols)` tensor.
    pub fn stack(mats: &[Matrix]) -> Self {
        let (rows, cols) = mats.first().map_or((0, 0), |m| m.shape());
        let mut data = Vec::with_capacity(mats.len() * rows * cols);
        for m in mats {
            assert_eq!(m.shape(), (rows, cols), "cannot stack matrices of different shapes");
            data.extend_from_slice(&m.data);
        }
        Tensor::new(data, vec![mats.len(), rows, cols])
    }

    /// Split a rank-3 tensor along its leading axis.
    pub fn unstack(&self) -> Vec<Matrix> {
        assert_eq!(self.shape.len(), 3, "unstack expects a rank-3 tensor");
        (0..self.shape[0]).map(|i| self.matrix(i)).collect()
    }

    /// The `i`-th slice along the leading axis of a rank-3 tensor.
    pub fn matrix(&self, i: usize) -> Matrix {
        assert_eq!(self.shape.len(), 3, "matrix expects a rank-3 tensor");
        let (rows, cols) = (self.shape[1], self.shape[2]);
        let size = rows * cols;
        Matrix::from_vec(rows, cols, self.data[i * size..(i + 1) * size].to_vec())
    }

    /// Compute the flat index for a multi-dimensional coordinate.
    fn offset(&self, idx: &[usize]) -> usize {
        assert_eq!(idx.len(), self.shape.len());
        let mut stride = 1;
        let mut off = 0usize;
        for (i, &dim) in self.shape.iter().rev().enumerate() {
            let id = idx[self.shape.len() - 1 - i];
            assert!(id < dim, "index out of bounds");
            off += id * stride;
            stride *= dim;
        }
        off
    }

    /// Basic immutable indexing.
    pub fn get(&self, idx: &[usize]) -> f32 {
        let off = self.offset(idx);
        self.data[off]
    }

    /// Mutable indexing support.
    pub fn set(&mut self, idx: &[usize], value: f32) {
        let off = self.offset(idx);
        self.data[off] = value;
    }

    /// Contiguous innermost-axis slice at the given outer coordinate, e.g.
    /// the feature vector at `[batch, time]` of a rank-3 tensor.
    pub fn lane(&self, outer: &[usize]) -> &[f32] {
        assert_eq!(outer.len() + 1, self.shape.len());
        let inner = *self.shape.last().unwrap_or(&0);
        let mut idx = outer.to_vec();
        idx.push(0);
        let off = self.offset(&idx);
        &self.data[off..off + inner]
    }

    pub fn lane_mut(&mut self, outer: &[usize]) -> &mut [f32] {
        assert_eq!(outer.len() + 1, self.shape.len());
        let inner = *self.shape.last().unwrap_or(&0);
        let mut idx = outer.to_vec();
        idx.push(0);
        let off = self.offset(&idx);
        &mut self.data[off..off + inner]
    }

    /// Swap the two leading axes of a rank-3 tensor:
    /// `(a, b, c) -> (b, a, c)`.
    pub fn transpose_01(&self) -> Tensor {
        assert_eq!(self.shape.len(), 3, "transpose_01 expects a rank-3 tensor");
        let (a, b, c) = (self.shape[0], self.shape[1], self.shape[2]);
        let mut out = vec![0.0; self.data.len()];
        for i in 0..a {
            for j in 0..b {
                let src = (i * b + j) * c;
                let dst = (j * a + i) * c;
                out[dst..dst + c].copy_from_slice(&self.data[src..src + c]);
            }
        }
        Tensor::new(out, vec![b, a, c])
    }

    /// Create a tensor of zeros with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        Tensor {
            data: vec![0.0; len],
            shape,
        }
    }

    /// Create a tensor filled with `value`.
    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let len: usize = shape.iter().product();
        Tensor {
            data: vec![value; len],
            shape,
        }
    }
}
