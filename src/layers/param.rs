use crate::math::Matrix;

/// A trainable weight matrix together with its accumulated gradient and the
/// Adam optimiser statistics that persist across iterations.
///
/// A frozen parameter never accumulates gradient and ignores optimiser
/// steps. Freezing is one-way.
#[derive(Clone, Debug)]
pub struct Param {
    pub value: Matrix,
    pub grad: Matrix,
    m: Matrix,
    v: Matrix,
    t: usize,
    frozen: bool,
}

impl Param {
    pub fn new(value: Matrix) -> Self {
        let (rows, cols) = value.shape();
        Self {
            value,
            grad: Matrix::zeros(rows, cols),
            m: Matrix::zeros(rows, cols),
            v: Matrix::zeros(rows, cols),
            t: 0,
            frozen: false,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value.shape()
    }

    pub fn len(&self) -> usize {
        self.value.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.data.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Exclude this parameter from gradient accumulation and optimisation
    /// for the rest of its life.
    pub fn freeze(&mut self) {
        self.frozen = true;
        self.zero_grad();
    }

    pub fn zero_grad(&mut self) {
        self.grad.data.iter_mut().for_each(|g| *g = 0.0);
    }

    /// `grad += g`, unless frozen.
    pub fn accumulate(&mut self, g: &Matrix) {
        if self.frozen {
            return;
        }
        self.grad.add_assign(g);
    }

    /// Add `g` into row `row` of the gradient, unless frozen.
    pub fn accumulate_row(&mut self, row: usize, g: &[f32]) {
        if self.frozen {
            return;
        }
        for (acc, &v) in self.grad.row_mut(row).iter_mut().zip(g) {
            *acc += v;
        }
    }

    pub fn sgd_step(&mut self, lr: f32, weight_decay: f32) {
        if self.frozen {
            return;
        }
        for (w, &g) in self.value.data.iter_mut().zip(self.grad.data.iter()) {
            *w -= lr * (g + weight_decay * *w);
        }
    }

    pub fn adam_step(&mut self, lr: f32, beta1: f32, beta2: f32, eps: f32, weight_decay: f32) {
        if self.frozen {
            return;
        }
        self.t += 1;
        let bc1 = 1.0 - beta1.powi(self.t as i32);
        let bc2 = 1.0 - beta2.powi(self.t as i32);
        for i in 0..self.value.data.len() {
            let g = self.grad.data[i] + weight_decay * self.value.data[i];
            self.m.data[i] = beta1 * self.m.data[i] + (1.0 - beta1) * g;
            self.v.data[i] = beta2 * self.v.data[i] + (1.0 - beta2) * g * g;
            let m_hat = self.m.data[i] / bc1;
            let v_hat = self.v.data[i] / bc2;
            self.value.data[i] -= lr * m_hat / (v_hat.sqrt() + eps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_param_ignores_gradients_and_steps() {
        let mut p = Param::new(Matrix::from_vec(1, 2, vec![1.0, 2.0]));
        p.freeze();
        p.accumulate(&Matrix::from_vec(1, 2, vec![5.0, 5.0]));
        p.sgd_step(0.1, 0.0);
        p.adam_step(0.1, 0.9, 0.999, 1e-8, 0.0);
        assert_eq!(p.grad.data, vec![0.0, 0.0]);
        assert_eq!(p.value.data, vec![1.0, 2.0]);
    }

    #[test]
    fn sgd_moves_against_gradient() {
        let mut p = Param::new(Matrix::from_vec(1, 1, vec![1.0]));
        p.accumulate(&Matrix::from_vec(1, 1, vec![2.0]));
        p.sgd_step(0.5, 0.0);
        assert_eq!(p.value.data, vec![0.0]);
    }
}
