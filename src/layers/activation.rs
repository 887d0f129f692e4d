//! Gate nonlinearities for the recurrent cells.
//!
//! Forward passes work in place. Backward passes take the activated output
//! rather than the pre-activation, since that is what the cells keep.

use crate::math::Matrix;

pub fn sigmoid(m: &mut Matrix) {
    for v in m.data.iter_mut() {
        *v = 1.0 / (1.0 + (-*v).exp());
    }
}

/// `grad *= s * (1 - s)` for `s = sigmoid(x)`.
pub fn sigmoid_backward(grad: &mut Matrix, activated: &Matrix) {
    for (g, &s) in grad.data.iter_mut().zip(activated.data.iter()) {
        *g *= s * (1.0 - s);
    }
}

pub fn tanh(m: &mut Matrix) {
    for v in m.data.iter_mut() {
        *v = v.tanh();
    }
}

/// `grad *= 1 - t²` for `t = tanh(x)`.
pub fn tanh_backward(grad: &mut Matrix, activated: &Matrix) {
    for (g, &t) in grad.data.iter_mut().zip(activated.data.iter()) {
        *g *= 1.0 - t * t;
    }
}
