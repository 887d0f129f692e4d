use std::sync::atomic::{AtomicUsize, Ordering};

use crate::tensor::Tensor;

static MATRIX_OPS: AtomicUsize = AtomicUsize::new(0);

pub fn reset_matrix_ops() {
    MATRIX_OPS.store(0, Ordering::SeqCst);
}

pub fn matrix_ops_count() -> usize {
    MATRIX_OPS.load(Ordering::SeqCst)
}

pub(crate) fn inc_ops() {
    MATRIX_OPS.fetch_add(1, Ordering::SeqCst);
}

/// Dense row-major matrix. Throughout the crate rows index batch elements
/// and columns index features.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(r: usize, c: usize) -> Self {
        Matrix {
            rows: r,
            cols: c,
            data: vec![0.0; r * c],
        }
    }

    pub fn filled(r: usize, c: usize, value: f32) -> Self {
        Matrix {
            rows: r,
            cols: c,
            data: vec![value; r * c],
        }
    }

    pub fn from_vec(r: usize, c: usize, v: Vec<f32>) -> Self {
        assert_eq!(v.len(), r * c);
        Matrix {
            rows: r,
            cols: c,
            data: v,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.data[r * self.cols + c] = v;
    }

    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Copy of the first `n` rows.
    pub fn top_rows(&self, n: usize) -> Matrix {
        assert!(n <= self.rows);
        Matrix::from_vec(n, self.cols, self.data[..n * self.cols].to_vec())
    }

    /// Overwrite the first `src.rows` rows with `src`.
    pub fn set_top_rows(&mut self, src: &Matrix) {
        assert_eq!(self.cols, src.cols);
        assert!(src.rows <= self.rows);
        self.data[..src.data.len()].copy_from_slice(&src.data);
    }

    pub fn matmul(a: &Matrix, b: &Matrix) -> Matrix {
        inc_ops();
        assert_eq!(a.cols, b.rows);
        let mut out = vec![0.0; a.rows * b.cols];
        for i in 0..a.rows {
            let a_row = &a.data[i * a.cols..(i + 1) * a.cols];
            let out_row = &mut out[i * b.cols..(i + 1) * b.cols];
            for (k, &a_val) in a_row.iter().enumerate() {
                let b_row = &b.data[k * b.cols..(k + 1) * b.cols];
                for (o, &b_val) in out_row.iter_mut().zip(b_row) {
                    *o += a_val * b_val;
                }
            }
        }
        Matrix::from_vec(a.rows, b.cols, out)
    }

    pub fn add(&self, other: &Matrix) -> Matrix {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Matrix) -> Matrix {
        self.zip_with(other, |a, b| a - b)
    }

    /// Elementwise (Hadamard) product.
    pub fn mul(&self, other: &Matrix) -> Matrix {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Matrix {
        inc_ops();
        Matrix::from_vec(self.rows, self.cols, self.data.iter().map(|&v| f(v)).collect())
    }

    fn zip_with(&self, other: &Matrix, f: impl Fn(f32, f32) -> f32) -> Matrix {
        inc_ops();
        assert_eq!(self.rows, other.rows);
        assert_eq!(self.cols, other.cols);
        let v = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Matrix::from_vec(self.rows, self.cols, v)
    }

    /// In-place `self += other`.
    pub fn add_assign(&mut self, other: &Matrix) {
        assert_eq!(self.rows, other.rows);
        assert_eq!(self.cols, other.cols);
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    /// Add `bias` (length `cols`) to every row.
    pub fn add_row_vector(&self, bias: &[f32]) -> Matrix {
        inc_ops();
        assert_eq!(bias.len(), self.cols);
        let mut out = self.clone();
        for row in out.data.chunks_mut(self.cols.max(1)) {
            for (v, &b) in row.iter_mut().zip(bias) {
                *v += b;
            }
        }
        out
    }

    /// Column sums, i.e. the reduction over the batch dimension.
    pub fn sum_rows(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.cols];
        for row in self.data.chunks(self.cols.max(1)) {
            for (o, &v) in out.iter_mut().zip(row) {
                *o += v;
            }
        }
        out
    }

    pub fn transpose(&self) -> Matrix {
        inc_ops();
        let mut v = vec![0.0; self.rows * self.cols];
        for i in 0..self.rows {
            for j in 0..self.cols {
                v[j * self.rows + i] = self.get(i, j);
            }
        }
        Matrix::from_vec(self.cols, self.rows, v)
    }

    /// Concatenate along the feature axis.
    pub fn hstack(a: &Matrix, b: &Matrix) -> Matrix {
        assert_eq!(a.rows, b.rows);
        let cols = a.cols + b.cols;
        let mut v = Vec::with_capacity(a.rows * cols);
        for r in 0..a.rows {
            v.extend_from_slice(a.row(r));
            v.extend_from_slice(b.row(r));
        }
        Matrix::from_vec(a.rows, cols, v)
    }

    /// Columns `[start, start + width)` as a new matrix.
    pub fn slice_cols(&self, start: usize, width: usize) -> Matrix {
        assert!(start + width <= self.cols);
        let mut v = Vec::with_capacity(self.rows * width);
        for r in 0..self.rows {
            v.extend_from_slice(&self.row(r)[start..start + width]);
        }
        Matrix::from_vec(self.rows, width, v)
    }

    pub fn softmax(&self) -> Matrix {
        inc_ops();
        let mut v = vec![0.0; self.data.len()];
        for (out, row) in v.chunks_mut(self.cols).zip(self.data.chunks(self.cols)) {
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for (o, &x) in out.iter_mut().zip(row) {
                *o = (x - max).exp();
                sum += *o;
            }
            for o in out.iter_mut() {
                *o /= sum;
            }
        }
        Matrix::from_vec(self.rows, self.cols, v)
    }

    /// Row-wise log-softmax, stabilised by the row maximum.
    pub fn log_softmax(&self) -> Matrix {
        inc_ops();
        let mut v = vec![0.0; self.data.len()];
        for (out, row) in v.chunks_mut(self.cols).zip(self.data.chunks(self.cols)) {
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let lse = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln() + max;
            for (o, &x) in out.iter_mut().zip(row) {
                *o = x - lse;
            }
        }
        Matrix::from_vec(self.rows, self.cols, v)
    }

    /// Index of the largest entry of every row. Ties resolve to the lowest
    /// index.
    pub fn argmax_rows(&self) -> Vec<usize> {
        self.data
            .chunks(self.cols.max(1))
            .map(|row| {
                let mut best = 0usize;
                let mut best_val = f32::NEG_INFINITY;
                for (i, &v) in row.iter().enumerate() {
                    if v > best_val {
                        best_val = v;
                        best = i;
                    }
                }
                best
            })
            .collect()
    }
}

/// Backward pass of a row-wise log-softmax given its output.
///
/// `d_in = g - softmax(x) * Σ g` where `softmax(x) = exp(log_probs)`.
pub fn log_softmax_backward(log_probs: &Matrix, grad_out: &Matrix) -> Matrix {
    assert_eq!(log_probs.shape(), grad_out.shape());
    let cols = log_probs.cols;
    let mut grad = Matrix::zeros(log_probs.rows, cols);
    for r in 0..log_probs.rows {
        let g = grad_out.row(r);
        let total: f32 = g.iter().sum();
        let lp = log_probs.row(r);
        let out = grad.row_mut(r);
        for c in 0..cols {
            out[c] = g[c] - lp[c].exp() * total;
        }
    }
    grad
}

/// Mean negative log-likelihood over a `(batch, time, vocab)` tensor of
/// log-probabilities.
///
/// Positions whose target equals `ignore_index` are skipped. Targets narrower
/// than the time axis count as ignored. Returns the loss together with the
/// gradient with respect to `log_probs`.
pub fn nll_loss(log_probs: &Tensor, targets: &[Vec<usize>], ignore_index: usize) -> (f32, Tensor) {
    assert_eq!(log_probs.shape.len(), 3);
    let (batch, time, vocab) = (log_probs.shape[0], log_probs.shape[1], log_probs.shape[2]);
    assert_eq!(targets.len(), batch);
    let mut grad = Tensor::zeros(log_probs.shape.clone());
    let mut loss = 0.0f32;
    let mut cnt = 0usize;
    for (b, row) in targets.iter().enumerate() {
        for (t, &tok) in row.iter().take(time).enumerate() {
            if tok == ignore_index {
                continue;
            }
            assert!(tok < vocab, "target id {tok} out of range");
            loss -= log_probs.get(&[b, t, tok]);
            grad.set(&[b, t, tok], -1.0);
            cnt += 1;
        }
    }
    if cnt > 0 {
        let inv = 1.0 / cnt as f32;
        loss *= inv;
        for g in grad.data.iter_mut() {
            *g *= inv;
        }
    }
    (loss, grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_softmax_rows_exponentiate_to_one() {
        let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, -1.0, 0.0, 100.0]);
        let lp = m.log_softmax();
        for row in lp.data.chunks(3) {
            let sum: f32 = row.iter().map(|v| v.exp()).sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
        let sm = m.softmax();
        for (a, b) in lp.data.iter().zip(sm.data.iter()) {
            assert!((a.exp() - b).abs() < 1e-5);
        }
    }

    #[test]
    fn matmul_propagates_non_finite_values_through_zero_weights() {
        let a = Matrix::from_vec(1, 2, vec![0.0, 1.0]);
        let b = Matrix::from_vec(2, 1, vec![f32::NAN, 2.0]);
        assert!(Matrix::matmul(&a, &b).data[0].is_nan());
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        let m = Matrix::from_vec(2, 3, vec![0.5, 0.5, 0.1, -3.0, -1.0, -2.0]);
        assert_eq!(m.argmax_rows(), vec![0, 1]);
    }

    #[test]
    fn hstack_then_slice_recovers_parts() {
        let a = Matrix::from_vec(2, 1, vec![1.0, 2.0]);
        let b = Matrix::from_vec(2, 2, vec![3.0, 4.0, 5.0, 6.0]);
        let c = Matrix::hstack(&a, &b);
        assert_eq!(c.data, vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
        assert_eq!(c.slice_cols(1, 2), b);
        assert_eq!(c.slice_cols(0, 1), a);
    }

    #[test]
    fn log_softmax_backward_sums_to_zero_per_row() {
        let m = Matrix::from_vec(1, 4, vec![0.3, -0.2, 1.5, 0.0]);
        let lp = m.log_softmax();
        let g = Matrix::from_vec(1, 4, vec![0.0, -1.0, 0.0, 0.0]);
        let d = log_softmax_backward(&lp, &g);
        let sum: f32 = d.data.iter().sum();
        assert!(sum.abs() < 1e-6);
    }

    #[test]
    fn nll_loss_ignores_padding_targets() {
        let lp = Matrix::from_vec(1, 2, vec![0.5f32.ln(), 0.5f32.ln()]);
        let mut data = lp.data.clone();
        data.extend_from_slice(&lp.data);
        let t = Tensor::new(data, vec![1, 2, 2]);
        let (loss, grad) = nll_loss(&t, &[vec![1, 0]], 0);
        assert!((loss - 2f32.ln()).abs() < 1e-6);
        assert_eq!(grad.data, vec![0.0, -1.0, 0.0, 0.0]);
    }
}
