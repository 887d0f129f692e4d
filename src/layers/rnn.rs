use rand::rngs::StdRng;
use rand::Rng;

use super::activation::{sigmoid, sigmoid_backward, tanh, tanh_backward};
use super::dropout::Dropout;
use super::layer::Module;
use super::linear::LinearT;
use super::param::Param;
use crate::data::PackedSequence;
use crate::math::Matrix;

/// Single GRU cell.
///
/// ```text
/// r  = σ(x·W_ir + b_ir + h·W_hr + b_hr)
/// z  = σ(x·W_iz + b_iz + h·W_hz + b_hz)
/// n  = tanh(x·W_in + b_in + r ⊙ (h·W_hn + b_hn))
/// h' = (1 - z) ⊙ n + z ⊙ h
/// ```
pub struct GruCell {
    pub w_ir: LinearT,
    pub w_iz: LinearT,
    pub w_in: LinearT,
    pub w_hr: LinearT,
    pub w_hz: LinearT,
    pub w_hn: LinearT,
    input_dim: usize,
    hidden_dim: usize,
}

/// Everything one cell step needs to be differentiated later.
#[derive(Clone, Debug)]
pub struct GruStepCache {
    x: Matrix,
    h_prev: Matrix,
    r: Matrix,
    z: Matrix,
    n: Matrix,
    hn: Matrix,
}

impl GruCell {
    /// All weights and biases drawn from `U(-1/sqrt(hidden), 1/sqrt(hidden))`.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        let k = 1.0 / (hidden_dim.max(1) as f32).sqrt();
        Self {
            w_ir: LinearT::new_uniform(input_dim, hidden_dim, k, rng),
            w_iz: LinearT::new_uniform(input_dim, hidden_dim, k, rng),
            w_in: LinearT::new_uniform(input_dim, hidden_dim, k, rng),
            w_hr: LinearT::new_uniform(hidden_dim, hidden_dim, k, rng),
            w_hz: LinearT::new_uniform(hidden_dim, hidden_dim, k, rng),
            w_hn: LinearT::new_uniform(hidden_dim, hidden_dim, k, rng),
            input_dim,
            hidden_dim,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Advance `h_prev` (rows = batch) by one input `x`.
    pub fn step(&self, x: &Matrix, h_prev: &Matrix) -> (Matrix, GruStepCache) {
        let mut r = self.w_ir.forward(x).add(&self.w_hr.forward(h_prev));
        sigmoid(&mut r);
        let mut z = self.w_iz.forward(x).add(&self.w_hz.forward(h_prev));
        sigmoid(&mut z);
        let hn = self.w_hn.forward(h_prev);
        let mut n = self.w_in.forward(x).add(&r.mul(&hn));
        tanh(&mut n);
        let h = n.add(&z.mul(&h_prev.sub(&n)));
        let cache = GruStepCache {
            x: x.clone(),
            h_prev: h_prev.clone(),
            r,
            z,
            n,
            hn,
        };
        (h, cache)
    }

    /// Given `dL/dh'`, accumulate weight gradients and return
    /// `(dL/dx, dL/dh_prev)`.
    pub fn backward(&mut self, cache: &GruStepCache, dh: &Matrix) -> (Matrix, Matrix) {
        let mut dn = dh.mul(&cache.z.map(|z| 1.0 - z));
        tanh_backward(&mut dn, &cache.n);
        let mut dz = dh.mul(&cache.h_prev.sub(&cache.n));
        sigmoid_backward(&mut dz, &cache.z);
        let d_hn = dn.mul(&cache.r);
        let mut dr = dn.mul(&cache.hn);
        sigmoid_backward(&mut dr, &cache.r);

        let mut dx = self.w_in.backward(&cache.x, &dn);
        dx.add_assign(&self.w_ir.backward(&cache.x, &dr));
        dx.add_assign(&self.w_iz.backward(&cache.x, &dz));

        let mut dh_prev = dh.mul(&cache.z);
        dh_prev.add_assign(&self.w_hn.backward(&cache.h_prev, &d_hn));
        dh_prev.add_assign(&self.w_hr.backward(&cache.h_prev, &dr));
        dh_prev.add_assign(&self.w_hz.backward(&cache.h_prev, &dz));
        (dx, dh_prev)
    }
}

impl Module for GruCell {
    fn parameters(&mut self) -> Vec<&mut Param> {
        let mut params = Vec::new();
        params.extend(self.w_ir.parameters());
        params.extend(self.w_iz.parameters());
        params.extend(self.w_in.parameters());
        params.extend(self.w_hr.parameters());
        params.extend(self.w_hz.parameters());
        params.extend(self.w_hn.parameters());
        params
    }
}

/// Multi-layer, optionally bidirectional GRU over batch rows.
///
/// Cells are stored direction-major: `cells[layer]` is the forward direction
/// of `layer` and, when bidirectional, `cells[num_layers + layer]` is its
/// backward direction. Final hidden states use the same order. Dropout sits
/// between layers only.
pub struct Gru {
    cells: Vec<GruCell>,
    input_size: usize,
    hidden_size: usize,
    num_layers: usize,
    bidirectional: bool,
    dropout: Dropout,
}

struct GruLayerCache {
    forward: Vec<GruStepCache>,
    backward: Vec<GruStepCache>,
    masks: Vec<Option<Matrix>>,
}

/// Per-call state of [`Gru::forward_packed`].
pub struct GruCache {
    layers: Vec<GruLayerCache>,
}

/// Per-call state of [`Gru::step`].
pub struct GruStackStepCache {
    cells: Vec<GruStepCache>,
    masks: Vec<Option<Matrix>>,
}

impl Gru {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        bidirectional: bool,
        dropout_prob: f32,
        rng: &mut R,
    ) -> Self {
        let dirs = if bidirectional { 2 } else { 1 };
        let mut cells = Vec::with_capacity(num_layers * dirs);
        for _ in 0..dirs {
            for layer in 0..num_layers {
                let in_dim = if layer == 0 {
                    input_size
                } else {
                    hidden_size * dirs
                };
                cells.push(GruCell::new(in_dim, hidden_size, rng));
            }
        }
        Self {
            cells,
            input_size,
            hidden_size,
            num_layers,
            bidirectional,
            dropout: Dropout::new(dropout_prob),
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn num_directions(&self) -> usize {
        if self.bidirectional {
            2
        } else {
            1
        }
    }

    pub fn cell(&self, direction: usize, layer: usize) -> &GruCell {
        &self.cells[direction * self.num_layers + layer]
    }

    pub fn cell_mut(&mut self, direction: usize, layer: usize) -> &mut GruCell {
        &mut self.cells[direction * self.num_layers + layer]
    }

    /// Run every layer and direction over a packed batch starting from zero
    /// hidden states.
    ///
    /// Returns the packed top-layer output (`num_directions * hidden_size`
    /// features per row), the final hidden state of every layer and direction
    /// (`batch × hidden_size` each, direction-major) and the cache for
    /// [`Gru::backward_packed`]. Inter-layer dropout is applied only when an
    /// rng is supplied.
    pub fn forward_packed(
        &self,
        input: &PackedSequence,
        mut rng: Option<&mut StdRng>,
    ) -> (PackedSequence, Vec<Matrix>, GruCache) {
        let batch = input.batch_size();
        let mut fwd_finals = Vec::with_capacity(self.num_layers);
        let mut bwd_finals = Vec::with_capacity(self.num_layers);
        let mut layers = Vec::with_capacity(self.num_layers);
        let mut steps = input.steps.clone();
        for layer in 0..self.num_layers {
            let (mut outputs, h_fwd, fwd_cache) =
                run_direction(self.cell(0, layer), &steps, batch, false);
            fwd_finals.push(h_fwd);
            let mut bwd_cache = Vec::new();
            if self.bidirectional {
                let (bwd_out, h_bwd, cache) =
                    run_direction(self.cell(1, layer), &steps, batch, true);
                outputs = outputs
                    .iter()
                    .zip(&bwd_out)
                    .map(|(f, b)| Matrix::hstack(f, b))
                    .collect();
                bwd_finals.push(h_bwd);
                bwd_cache = cache;
            }
            let mut masks = Vec::new();
            if layer + 1 < self.num_layers {
                for out in outputs.iter_mut() {
                    let (dropped, mask) = self.dropout.forward(out, rng.as_deref_mut());
                    *out = dropped;
                    masks.push(mask);
                }
            }
            layers.push(GruLayerCache {
                forward: fwd_cache,
                backward: bwd_cache,
                masks,
            });
            steps = outputs;
        }
        fwd_finals.extend(bwd_finals);
        let output = PackedSequence {
            steps,
            batch_sizes: input.batch_sizes.clone(),
        };
        (output, fwd_finals, GruCache { layers })
    }

    /// Back-propagate through a [`Gru::forward_packed`] call.
    ///
    /// `grad_output` holds one matrix per packed step, shaped like the
    /// forward output; `grad_final` one `batch × hidden_size` matrix per
    /// layer and direction. Returns the gradient with respect to the packed
    /// input steps.
    pub fn backward_packed(
        &mut self,
        cache: &GruCache,
        grad_output: &[Matrix],
        grad_final: &[Matrix],
    ) -> Vec<Matrix> {
        let h = self.hidden_size;
        let num_layers = self.num_layers;
        let mut grad = grad_output.to_vec();
        for layer in (0..num_layers).rev() {
            let lc = &cache.layers[layer];
            if !lc.masks.is_empty() {
                grad = grad
                    .iter()
                    .zip(&lc.masks)
                    .map(|(g, m)| Dropout::backward(g, m.as_ref()))
                    .collect();
            }
            if self.bidirectional {
                let fwd: Vec<Matrix> = grad.iter().map(|g| g.slice_cols(0, h)).collect();
                let bwd: Vec<Matrix> = grad.iter().map(|g| g.slice_cols(h, h)).collect();
                let mut dx = backprop_direction(
                    self.cell_mut(0, layer),
                    &lc.forward,
                    &fwd,
                    &grad_final[layer],
                    false,
                );
                let dx_bwd = backprop_direction(
                    self.cell_mut(1, layer),
                    &lc.backward,
                    &bwd,
                    &grad_final[num_layers + layer],
                    true,
                );
                for (a, b) in dx.iter_mut().zip(&dx_bwd) {
                    a.add_assign(b);
                }
                grad = dx;
            } else {
                grad = backprop_direction(
                    self.cell_mut(0, layer),
                    &lc.forward,
                    &grad,
                    &grad_final[layer],
                    false,
                );
            }
        }
        grad
    }

    /// Advance a unidirectional stack by one time step.
    ///
    /// `hidden` holds one `batch × hidden_size` matrix per layer. Returns the
    /// top-layer output, the new hidden states and the step cache.
    pub fn step(
        &self,
        x: &Matrix,
        hidden: &[Matrix],
        mut rng: Option<&mut StdRng>,
    ) -> (Matrix, Vec<Matrix>, GruStackStepCache) {
        assert!(!self.bidirectional, "step requires a unidirectional GRU");
        assert_eq!(hidden.len(), self.num_layers);
        let mut input = x.clone();
        let mut new_hidden = Vec::with_capacity(self.num_layers);
        let mut cells = Vec::with_capacity(self.num_layers);
        let mut masks = Vec::new();
        for (layer, h_prev) in hidden.iter().enumerate() {
            let (h, cache) = self.cells[layer].step(&input, h_prev);
            cells.push(cache);
            input = if layer + 1 < self.num_layers {
                let (dropped, mask) = self.dropout.forward(&h, rng.as_deref_mut());
                masks.push(mask);
                dropped
            } else {
                h.clone()
            };
            new_hidden.push(h);
        }
        (input, new_hidden, GruStackStepCache { cells, masks })
    }

    /// Back-propagate one [`Gru::step`].
    ///
    /// `grad_top` is the gradient reaching the top-layer output from above;
    /// `grad_hidden` the gradient reaching each new hidden state from later
    /// steps. Returns `(dL/dx, dL/dhidden_prev)`.
    pub fn step_backward(
        &mut self,
        cache: &GruStackStepCache,
        grad_top: &Matrix,
        grad_hidden: &[Matrix],
    ) -> (Matrix, Vec<Matrix>) {
        let mut grad_prev = vec![Matrix::zeros(0, 0); self.num_layers];
        let mut grad_out = grad_top.clone();
        for layer in (0..self.num_layers).rev() {
            let mut dh = grad_hidden[layer].clone();
            dh.add_assign(&grad_out);
            let (dx, dh_prev) = self.cells[layer].backward(&cache.cells[layer], &dh);
            grad_prev[layer] = dh_prev;
            grad_out = if layer > 0 {
                Dropout::backward(&dx, cache.masks[layer - 1].as_ref())
            } else {
                dx
            };
        }
        (grad_out, grad_prev)
    }
}

impl Module for Gru {
    fn parameters(&mut self) -> Vec<&mut Param> {
        self.cells.iter_mut().flat_map(|c| c.parameters()).collect()
    }
}

/// One direction of one layer over packed steps. Only the first
/// `steps[t].rows` rows of the running hidden state advance at step `t`.
fn run_direction(
    cell: &GruCell,
    steps: &[Matrix],
    batch: usize,
    reverse: bool,
) -> (Vec<Matrix>, Matrix, Vec<GruStepCache>) {
    let mut h = Matrix::zeros(batch, cell.hidden_dim());
    let mut outputs = Vec::with_capacity(steps.len());
    let mut caches = Vec::with_capacity(steps.len());
    let order: Vec<usize> = if reverse {
        (0..steps.len()).rev().collect()
    } else {
        (0..steps.len()).collect()
    };
    for t in order {
        let x = &steps[t];
        let (h_new, cache) = cell.step(x, &h.top_rows(x.rows));
        h.set_top_rows(&h_new);
        outputs.push(h_new);
        caches.push(cache);
    }
    if reverse {
        outputs.reverse();
        caches.reverse();
    }
    (outputs, h, caches)
}

/// Reverse of [`run_direction`]: walk the steps in the opposite order,
/// carrying `dL/dh` for the whole batch.
fn backprop_direction(
    cell: &mut GruCell,
    caches: &[GruStepCache],
    grads: &[Matrix],
    grad_final: &Matrix,
    reverse: bool,
) -> Vec<Matrix> {
    let mut dh = grad_final.clone();
    let mut dx = vec![Matrix::zeros(0, 0); caches.len()];
    let order: Vec<usize> = if reverse {
        (0..caches.len()).collect()
    } else {
        (0..caches.len()).rev().collect()
    };
    for t in order {
        let mut dh_t = dh.top_rows(grads[t].rows);
        dh_t.add_assign(&grads[t]);
        let (dx_t, dh_prev) = cell.backward(&caches[t], &dh_t);
        dh.set_top_rows(&dh_prev);
        dx[t] = dx_t;
    }
    dx
}
