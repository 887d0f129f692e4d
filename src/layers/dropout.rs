use rand::rngs::StdRng;
use rand::Rng;

use crate::math::Matrix;

/// Inverted dropout.
///
/// Each element is kept with probability `1 - p` and scaled by `1/(1 - p)`.
/// The layer holds no state: `forward` hands back the mask it sampled so the
/// caller can keep it alongside its other per-call caches and pass it to
/// `backward`.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    /// Without an rng (inference) or with `p == 0` the input passes through
    /// untouched and no mask is produced.
    pub fn forward(&self, x: &Matrix, rng: Option<&mut StdRng>) -> (Matrix, Option<Matrix>) {
        let rng = match rng {
            Some(rng) if self.p > 0.0 => rng,
            _ => return (x.clone(), None),
        };
        let scale = 1.0 / (1.0 - self.p);
        let mut mask = Matrix::zeros(x.rows, x.cols);
        for m in mask.data.iter_mut() {
            if rng.gen::<f32>() >= self.p {
                *m = scale;
            }
        }
        (x.mul(&mask), Some(mask))
    }

    /// Route `grad` through the mask sampled in `forward`.
    pub fn backward(grad: &Matrix, mask: Option<&Matrix>) -> Matrix {
        match mask {
            Some(mask) => grad.mul(mask),
            None => grad.clone(),
        }
    }
}
