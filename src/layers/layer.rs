use super::param::Param;

/// Common interface for anything that owns trainable weights.
///
/// `parameters` is the optimizer-facing enumeration: it yields trainable
/// parameters only, so frozen tables (e.g. pretrained embeddings) never
/// reach an optimizer through it.
pub trait Module {
    /// Mutable references to the trainable parameters, in a stable order.
    fn parameters(&mut self) -> Vec<&mut Param>;

    /// Zero any accumulated gradients.
    fn zero_grad(&mut self) {
        for p in self.parameters() {
            p.zero_grad();
        }
    }

    /// Plain gradient descent step on every trainable parameter.
    fn sgd_step(&mut self, lr: f32, weight_decay: f32) {
        for p in self.parameters() {
            p.sgd_step(lr, weight_decay);
        }
    }

    /// Perform an Adam optimisation step.
    fn adam_step(&mut self, lr: f32, beta1: f32, beta2: f32, eps: f32, weight_decay: f32) {
        for p in self.parameters() {
            p.adam_step(lr, beta1, beta2, eps, weight_decay);
        }
    }

    /// Total number of trainable scalars.
    fn num_parameters(&mut self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }
}
