use rand::Rng;
use rand_distr::{Distribution, Uniform};

use super::layer::Module;
use super::param::Param;
use crate::math::Matrix;

/// Affine layer `y = x·W + b` with `W` stored as `(in_dim, out_dim)`.
///
/// The layer keeps no per-call state: `backward` receives the input that was
/// fed to `forward`, so one layer can be applied many times per pass (every
/// time step of a recurrence) and back-propagated step by step.
pub struct LinearT {
    pub w: Param,
    pub b: Option<Param>,
}

impl LinearT {
    /// Weights and bias drawn from `U(-1/sqrt(in_dim), 1/sqrt(in_dim))`.
    pub fn new<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_dim.max(1) as f32).sqrt();
        Self::new_uniform(in_dim, out_dim, bound, rng)
    }

    /// Weights and bias drawn from `U(-bound, bound)`.
    pub fn new_uniform<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        bound: f32,
        rng: &mut R,
    ) -> Self {
        let dist = Uniform::new_inclusive(-bound, bound);
        let w = Matrix::from_vec(
            in_dim,
            out_dim,
            (0..in_dim * out_dim).map(|_| dist.sample(rng)).collect(),
        );
        let b = Matrix::from_vec(1, out_dim, (0..out_dim).map(|_| dist.sample(rng)).collect());
        Self {
            w: Param::new(w),
            b: Some(Param::new(b)),
        }
    }

    /// Layer without a bias term.
    pub fn from_weights(w: Matrix) -> Self {
        Self {
            w: Param::new(w),
            b: None,
        }
    }

    pub fn in_dim(&self) -> usize {
        self.w.value.rows
    }

    pub fn out_dim(&self) -> usize {
        self.w.value.cols
    }

    pub fn forward(&self, x: &Matrix) -> Matrix {
        let y = Matrix::matmul(x, &self.w.value);
        match &self.b {
            Some(b) => y.add_row_vector(&b.value.data),
            None => y,
        }
    }

    /// Accumulate `dW = xᵀ·g` and `db = Σ_rows g`; return `g·Wᵀ`.
    pub fn backward(&mut self, x: &Matrix, grad_out: &Matrix) -> Matrix {
        if !self.w.is_frozen() {
            let grad_w = Matrix::matmul(&x.transpose(), grad_out);
            self.w.accumulate(&grad_w);
        }
        if let Some(b) = &mut self.b {
            let grad_b = Matrix::from_vec(1, grad_out.cols, grad_out.sum_rows());
            b.accumulate(&grad_b);
        }
        Matrix::matmul(grad_out, &self.w.value.transpose())
    }
}

impl Module for LinearT {
    fn parameters(&mut self) -> Vec<&mut Param> {
        let mut params = Vec::with_capacity(2);
        if !self.w.is_frozen() {
            params.push(&mut self.w);
        }
        if let Some(b) = self.b.as_mut().filter(|b| !b.is_frozen()) {
            params.push(b);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;

    #[test]
    fn forward_adds_bias_to_every_row() {
        let mut layer = LinearT::from_weights(Matrix::from_vec(2, 1, vec![1.0, 2.0]));
        layer.b = Some(Param::new(Matrix::from_vec(1, 1, vec![0.5])));
        let x = Matrix::from_vec(2, 2, vec![1.0, 1.0, 0.0, 1.0]);
        assert_eq!(layer.forward(&x).data, vec![3.5, 2.5]);
    }

    #[test]
    fn backward_accumulates_weight_and_bias_gradients() {
        let mut layer = LinearT::new(2, 1, &mut seeded(1));
        let x = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let g = Matrix::from_vec(2, 1, vec![1.0, -1.0]);
        let w = layer.w.value.clone();
        let dx = layer.backward(&x, &g);
        assert_eq!(layer.w.grad.data, vec![-2.0, -2.0]);
        assert_eq!(layer.b.as_ref().unwrap().grad.data, vec![0.0]);
        assert_eq!(dx.data, vec![w.data[0], w.data[1], -w.data[0], -w.data[1]]);
    }
}
