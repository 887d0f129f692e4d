//! Padded token batches and their packed, length-aware counterpart.

use crate::error::ModelError;
use crate::math::Matrix;
use crate::tensor::Tensor;
use crate::tokens::PAD_TOKEN_ID;

/// A right-padded batch of token-id sequences together with their true
/// lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBatch {
    ids: Vec<Vec<usize>>,
    lengths: Vec<usize>,
}

impl TokenBatch {
    /// Build a batch from already padded rows.
    ///
    /// Every row must have the same width and every length must lie in
    /// `1..=width`. Ordering is not checked here; see
    /// [`TokenBatch::check_sorted`].
    pub fn new(ids: Vec<Vec<usize>>, lengths: Vec<usize>) -> Result<Self, ModelError> {
        if ids.is_empty() {
            return Err(ModelError::EmptyBatch);
        }
        if ids.len() != lengths.len() {
            return Err(ModelError::LengthCountMismatch {
                rows: ids.len(),
                lengths: lengths.len(),
            });
        }
        let width = ids[0].len();
        for (row, seq) in ids.iter().enumerate() {
            if seq.len() != width {
                return Err(ModelError::RaggedBatch {
                    row,
                    width: seq.len(),
                    expected: width,
                });
            }
        }
        for (row, &length) in lengths.iter().enumerate() {
            if length == 0 || length > width {
                return Err(ModelError::InvalidLength { row, length, width });
            }
        }
        Ok(Self { ids, lengths })
    }

    /// Right-pad unequal sequences with [`PAD_TOKEN_ID`] and record their
    /// lengths.
    pub fn from_sequences(seqs: Vec<Vec<usize>>) -> Result<Self, ModelError> {
        let width = seqs.iter().map(Vec::len).max().unwrap_or(0);
        let lengths = seqs.iter().map(Vec::len).collect();
        let ids = seqs
            .into_iter()
            .map(|mut s| {
                s.resize(width, PAD_TOKEN_ID);
                s
            })
            .collect();
        Self::new(ids, lengths)
    }

    pub fn ids(&self) -> &[Vec<usize>] {
        &self.ids
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn batch_size(&self) -> usize {
        self.ids.len()
    }

    /// Padded width of every row.
    pub fn width(&self) -> usize {
        self.ids[0].len()
    }

    pub fn max_length(&self) -> usize {
        self.lengths.iter().copied().max().unwrap_or(0)
    }

    /// Token at `(row, t)`, or [`PAD_TOKEN_ID`] past the padded width.
    pub fn token(&self, row: usize, t: usize) -> usize {
        self.ids[row].get(t).copied().unwrap_or(PAD_TOKEN_ID)
    }

    /// Column `t` across the batch, padded with [`PAD_TOKEN_ID`] past the
    /// width.
    pub fn column(&self, t: usize) -> Vec<usize> {
        (0..self.batch_size()).map(|r| self.token(r, t)).collect()
    }

    /// Packing requires lengths in non-increasing order.
    pub fn check_sorted(&self) -> Result<(), ModelError> {
        match self.lengths.windows(2).position(|w| w[0] < w[1]) {
            Some(i) => Err(ModelError::UnsortedLengths { row: i + 1 }),
            None => Ok(()),
        }
    }

    pub fn check_vocab(&self, vocab_size: usize) -> Result<(), ModelError> {
        for row in &self.ids {
            if let Some(&token) = row.iter().find(|&&t| t >= vocab_size) {
                return Err(ModelError::TokenOutOfRange { token, vocab_size });
            }
        }
        Ok(())
    }

    /// Reorder rows by descending length (stable), returning the sorted
    /// batch and the permutation `perm` such that sorted row `i` is original
    /// row `perm[i]`.
    pub fn sort_by_length(&self) -> (TokenBatch, Vec<usize>) {
        let mut perm: Vec<usize> = (0..self.batch_size()).collect();
        perm.sort_by(|&a, &b| self.lengths[b].cmp(&self.lengths[a]));
        let ids = perm.iter().map(|&i| self.ids[i].clone()).collect();
        let lengths = perm.iter().map(|&i| self.lengths[i]).collect();
        (TokenBatch { ids, lengths }, perm)
    }
}

/// A padded batch compacted by time step.
///
/// `steps[t]` holds the rows of the sequences still running at step `t`;
/// because sequences are sorted by descending length those are always the
/// first `batch_sizes[t]` batch elements.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedSequence {
    pub steps: Vec<Matrix>,
    pub batch_sizes: Vec<usize>,
}

impl PackedSequence {
    /// Number of active sequences at every step for descending `lengths`.
    pub fn batch_sizes_for(lengths: &[usize]) -> Vec<usize> {
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        (0..max_len)
            .map(|t| lengths.iter().filter(|&&l| l > t).count())
            .collect()
    }

    /// Pack a `(batch, width, features)` tensor, dropping every position at
    /// or beyond a sequence's length.
    pub fn pack_padded(padded: &Tensor, lengths: &[usize]) -> Result<Self, ModelError> {
        if padded.shape.len() != 3 || padded.shape[0] != lengths.len() {
            let dim = |i: usize| padded.shape.get(i).copied().unwrap_or(0);
            return Err(ModelError::ShapeMismatch {
                what: "padded sequence",
                expected: vec![lengths.len(), dim(1), dim(2)],
                actual: padded.shape.clone(),
            });
        }
        if lengths.is_empty() {
            return Err(ModelError::EmptyBatch);
        }
        if let Some(i) = lengths.windows(2).position(|w| w[0] < w[1]) {
            return Err(ModelError::UnsortedLengths { row: i + 1 });
        }
        let width = padded.shape[1];
        let features = padded.shape[2];
        for (row, &length) in lengths.iter().enumerate() {
            if length == 0 || length > width {
                return Err(ModelError::InvalidLength { row, length, width });
            }
        }
        let batch_sizes = Self::batch_sizes_for(lengths);
        let steps = batch_sizes
            .iter()
            .enumerate()
            .map(|(t, &bs)| {
                let mut step = Matrix::zeros(bs, features);
                for b in 0..bs {
                    step.row_mut(b).copy_from_slice(padded.lane(&[b, t]));
                }
                step
            })
            .collect();
        Ok(Self { steps, batch_sizes })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_sizes.first().copied().unwrap_or(0)
    }

    pub fn max_length(&self) -> usize {
        self.batch_sizes.len()
    }

    pub fn features(&self) -> usize {
        self.steps.first().map_or(0, |m| m.cols)
    }

    /// Recover per-sequence lengths from the step sizes.
    pub fn lengths(&self) -> Vec<usize> {
        (0..self.batch_size())
            .map(|b| self.batch_sizes.iter().filter(|&&bs| bs > b).count())
            .collect()
    }

    /// Expand back to `(batch, max_length, features)`, filling positions
    /// past each sequence's end with `padding_value`.
    pub fn unpack(&self, padding_value: f32) -> Tensor {
        let (batch, time, features) = (self.batch_size(), self.max_length(), self.features());
        let mut out = Tensor::filled(vec![batch, time, features], padding_value);
        for (t, step) in self.steps.iter().enumerate() {
            for b in 0..step.rows {
                out.lane_mut(&[b, t]).copy_from_slice(step.row(b));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_sequences_pads_with_pad_id() {
        let batch = TokenBatch::from_sequences(vec![vec![2, 3, 4], vec![5, 6]]).unwrap();
        assert_eq!(batch.ids()[1], vec![5, 6, PAD_TOKEN_ID]);
        assert_eq!(batch.lengths(), &[3, 2]);
        assert!(batch.check_sorted().is_ok());
    }

    #[test]
    fn sort_by_length_returns_permutation() {
        let batch = TokenBatch::from_sequences(vec![vec![2], vec![3, 4, 5], vec![6, 7]]).unwrap();
        assert!(matches!(
            batch.check_sorted(),
            Err(ModelError::UnsortedLengths { row: 1 })
        ));
        let (sorted, perm) = batch.sort_by_length();
        assert_eq!(perm, vec![1, 2, 0]);
        assert_eq!(sorted.lengths(), &[3, 2, 1]);
        assert!(sorted.check_sorted().is_ok());
    }

    #[test]
    fn rejects_lengths_beyond_width() {
        let err = TokenBatch::new(vec![vec![2, 3]], vec![3]).unwrap_err();
        assert_eq!(err, ModelError::InvalidLength { row: 0, length: 3, width: 2 });
    }

    #[test]
    fn pack_then_unpack_restores_valid_positions() {
        // batch 2, width 3, features 1
        let padded = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 9.0], vec![2, 3, 1]);
        let packed = PackedSequence::pack_padded(&padded, &[3, 2]).unwrap();
        assert_eq!(packed.batch_sizes, vec![2, 2, 1]);
        assert_eq!(packed.lengths(), vec![3, 2]);
        assert_eq!(packed.steps[2].data, vec![3.0]);
        let unpacked = packed.unpack(0.0);
        assert_eq!(unpacked.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 0.0]);
    }

    #[test]
    fn unpack_truncates_to_longest_sequence() {
        let padded = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2, 1]);
        let packed = PackedSequence::pack_padded(&padded, &[1, 1]).unwrap();
        assert_eq!(packed.unpack(0.0).shape, vec![2, 1, 1]);
    }
}
