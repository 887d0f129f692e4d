use rand::Rng;
use rand_distr::StandardNormal;

use super::layer::Module;
use super::param::Param;
use crate::error::ModelError;
use crate::math::Matrix;

/// Embedding layer: maps token ids to rows of a `(vocab_size, dim)` table.
///
/// The row at `padding_idx` starts at zero and never receives gradient.
pub struct EmbeddingT {
    pub table: Param,
    padding_idx: Option<usize>,
}

impl EmbeddingT {
    /// Table entries drawn from a standard normal distribution.
    pub fn new<R: Rng + ?Sized>(
        vocab_size: usize,
        dim: usize,
        padding_idx: Option<usize>,
        rng: &mut R,
    ) -> Self {
        let mut table = Matrix::from_vec(
            vocab_size,
            dim,
            (0..vocab_size * dim)
                .map(|_| rng.sample::<f32, _>(StandardNormal))
                .collect(),
        );
        if let Some(pad) = padding_idx.filter(|&p| p < vocab_size) {
            table.row_mut(pad).iter_mut().for_each(|v| *v = 0.0);
        }
        Self {
            table: Param::new(table),
            padding_idx,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.table.value.rows
    }

    pub fn dim(&self) -> usize {
        self.table.value.cols
    }

    pub fn padding_idx(&self) -> Option<usize> {
        self.padding_idx
    }

    pub fn is_frozen(&self) -> bool {
        self.table.is_frozen()
    }

    /// Look up `ids`, one output row per id.
    ///
    /// Ids must be below `vocab_size`; callers validate them first.
    pub fn forward(&self, ids: &[usize]) -> Matrix {
        let mut out = Matrix::zeros(ids.len(), self.dim());
        for (i, &id) in ids.iter().enumerate() {
            out.row_mut(i).copy_from_slice(self.table.value.row(id));
        }
        out
    }

    /// Scatter-add `grad` rows into the table gradient.
    pub fn backward(&mut self, ids: &[usize], grad: &Matrix) {
        if self.table.is_frozen() {
            return;
        }
        for (i, &id) in ids.iter().enumerate() {
            if Some(id) == self.padding_idx {
                continue;
            }
            self.table.accumulate_row(id, grad.row(i));
        }
    }

    /// Replace the table with `weight` and freeze it.
    pub fn load_pretrained(&mut self, weight: Matrix) -> Result<(), ModelError> {
        if weight.shape() != self.table.shape() {
            return Err(ModelError::ShapeMismatch {
                what: "embedding weight",
                expected: vec![self.vocab_size(), self.dim()],
                actual: vec![weight.rows, weight.cols],
            });
        }
        self.table = Param::new(weight);
        self.table.freeze();
        Ok(())
    }
}

impl Module for EmbeddingT {
    fn parameters(&mut self) -> Vec<&mut Param> {
        if self.table.is_frozen() {
            Vec::new()
        } else {
            vec![&mut self.table]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;

    #[test]
    fn padding_row_starts_at_zero_and_stays_gradient_free() {
        let mut emb = EmbeddingT::new(5, 3, Some(0), &mut seeded(3));
        assert_eq!(emb.forward(&[0]).data, vec![0.0; 3]);
        let grad = Matrix::filled(3, 3, 1.0);
        emb.backward(&[0, 2, 2], &grad);
        assert_eq!(emb.table.grad.row(0), &[0.0, 0.0, 0.0]);
        assert_eq!(emb.table.grad.row(2), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn pretrained_table_is_frozen_and_returned_verbatim() {
        let mut emb = EmbeddingT::new(2, 2, Some(0), &mut seeded(3));
        let w = Matrix::from_vec(2, 2, vec![0.5, 0.25, -1.0, 2.0]);
        emb.load_pretrained(w).unwrap();
        assert_eq!(emb.forward(&[1, 0]).data, vec![-1.0, 2.0, 0.5, 0.25]);
        assert!(emb.parameters().is_empty());
        emb.backward(&[1], &Matrix::filled(1, 2, 1.0));
        assert_eq!(emb.table.grad.data, vec![0.0; 4]);
    }

    #[test]
    fn pretrained_shape_must_match() {
        let mut emb = EmbeddingT::new(2, 2, None, &mut seeded(3));
        let err = emb.load_pretrained(Matrix::zeros(3, 2)).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
        assert!(!emb.is_frozen());
    }
}
