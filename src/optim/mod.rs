pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::SGD;

use crate::layers::Param;

/// Common interface for optimizers operating on trainable parameters.
///
/// Frozen parameters are left untouched even when passed in explicitly.
pub trait Optimizer {
    /// Update the provided parameters in-place from their accumulated
    /// gradients.
    fn step(&mut self, params: &mut [&mut Param]);
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Param]) {
        Adam::step(self, params);
    }
}

impl Optimizer for SGD {
    fn step(&mut self, params: &mut [&mut Param]) {
        SGD::step(self, params);
    }
}
