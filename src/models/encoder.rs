use log::debug;
use rand::rngs::StdRng;
use rand::Rng;

use crate::config::EncoderConfig;
use crate::data::{PackedSequence, TokenBatch};
use crate::error::{ConfigError, ModelError};
use crate::layers::{EmbeddingT, Gru, GruCache, Module, Param};
use crate::math::Matrix;
use crate::rng::rng_from_env;
use crate::tensor::Tensor;
use crate::tokens::PAD_TOKEN_ID;

/// Value written into output positions past a sequence's length.
pub const PADDING_VALUE: f32 = PAD_TOKEN_ID as f32;

/// Embedding lookup followed by a (possibly bidirectional) multi-layer GRU
/// over a length-aware packed batch.
pub struct Encoder {
    config: EncoderConfig,
    pub embedding: EmbeddingT,
    pub rnn: Gru,
}

/// Direction-merged encoder result.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOutput {
    /// `(batch, max_length, hidden_size)`.
    pub output: Tensor,
    /// `(num_layers, batch, hidden_size)`.
    pub hidden: Tensor,
}

/// Per-call state kept by [`Encoder::forward_train`].
pub struct EncoderCache {
    step_ids: Vec<Vec<usize>>,
    gru: GruCache,
    batch_size: usize,
    max_length: usize,
}

impl Encoder {
    pub fn new(config: EncoderConfig) -> Result<Self, ConfigError> {
        let mut rng = rng_from_env();
        Self::with_rng(config, &mut rng)
    }

    pub fn with_rng<R: Rng + ?Sized>(config: EncoderConfig, rng: &mut R) -> Result<Self, ConfigError> {
        config.validate()?;
        debug!(
            "encoder: vocab={} emb={} hidden={} layers={} bidirectional={} dropout={} device={}",
            config.vocab_size,
            config.embedding_dim,
            config.hidden_size,
            config.num_layers,
            config.bidirectional,
            config.dropout_prob,
            config.device
        );
        let embedding = EmbeddingT::new(
            config.vocab_size,
            config.embedding_dim,
            Some(PAD_TOKEN_ID),
            rng,
        );
        let rnn = Gru::new(
            config.embedding_dim,
            config.hidden_size,
            config.num_layers,
            config.bidirectional,
            config.dropout_prob,
            rng,
        );
        Ok(Self {
            config,
            embedding,
            rnn,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encode a right-padded batch whose lengths are sorted in descending
    /// order. Dropout is never applied here.
    pub fn forward(&self, batch: &TokenBatch) -> Result<EncoderOutput, ModelError> {
        self.run(batch, None).map(|(out, _)| out)
    }

    /// Like [`Encoder::forward`] but with inter-layer dropout drawn from
    /// `rng`, also returning what [`Encoder::backward`] needs.
    pub fn forward_train(
        &self,
        batch: &TokenBatch,
        rng: &mut StdRng,
    ) -> Result<(EncoderOutput, EncoderCache), ModelError> {
        self.run(batch, Some(rng))
    }

    fn run(
        &self,
        batch: &TokenBatch,
        rng: Option<&mut StdRng>,
    ) -> Result<(EncoderOutput, EncoderCache), ModelError> {
        batch.check_vocab(self.config.vocab_size)?;
        batch.check_sorted()?;
        let (b, w, e) = (batch.batch_size(), batch.width(), self.config.embedding_dim);
        let ids: Vec<usize> = batch.ids().iter().flatten().copied().collect();
        let embedded = Tensor::new(self.embedding.forward(&ids).data, vec![b, w, e]);
        let packed = PackedSequence::pack_padded(&embedded, batch.lengths())?;

        let (packed_out, finals, gru) = self.rnn.forward_packed(&packed, rng);
        let unpacked = packed_out.unpack(PADDING_VALUE);

        let h = self.config.hidden_size;
        let layers = self.config.num_layers;
        let (output, hidden) = if self.config.bidirectional {
            let hidden: Vec<Matrix> = (0..layers)
                .map(|l| finals[l].add(&finals[layers + l]))
                .collect();
            (merge_directions(&unpacked, h), hidden)
        } else {
            (unpacked, finals)
        };

        let step_ids = packed
            .batch_sizes
            .iter()
            .enumerate()
            .map(|(t, &bs)| (0..bs).map(|row| batch.token(row, t)).collect())
            .collect();
        let cache = EncoderCache {
            step_ids,
            gru,
            batch_size: b,
            max_length: packed.max_length(),
        };
        let out = EncoderOutput {
            output,
            hidden: Tensor::stack(&hidden),
        };
        Ok((out, cache))
    }

    /// Back-propagate gradients of the merged output `(batch, max_length,
    /// hidden)` and hidden state `(layers, batch, hidden)` into the GRU and
    /// embedding parameters.
    pub fn backward(
        &mut self,
        cache: &EncoderCache,
        grad_output: &Tensor,
        grad_hidden: &Tensor,
    ) -> Result<(), ModelError> {
        let h = self.config.hidden_size;
        let layers = self.config.num_layers;
        let b = cache.batch_size;
        check_shape("encoder output gradient", &[b, cache.max_length, h], grad_output)?;
        check_shape("encoder hidden gradient", &[layers, b, h], grad_hidden)?;

        let dirs = self.config.num_directions();
        let step_grads: Vec<Matrix> = cache
            .step_ids
            .iter()
            .enumerate()
            .map(|(t, ids)| {
                let mut g = Matrix::zeros(ids.len(), dirs * h);
                for row in 0..ids.len() {
                    let lane = grad_output.lane(&[row, t]);
                    for d in 0..dirs {
                        g.row_mut(row)[d * h..(d + 1) * h].copy_from_slice(lane);
                    }
                }
                g
            })
            .collect();
        let mut grad_final = grad_hidden.unstack();
        if self.config.bidirectional {
            grad_final.extend_from_within(..);
        }

        let grad_input = self.rnn.backward_packed(&cache.gru, &step_grads, &grad_final);
        for (ids, g) in cache.step_ids.iter().zip(&grad_input) {
            self.embedding.backward(ids, g);
        }
        Ok(())
    }

    /// Replace the embedding table with `weight` (`vocab_size ×
    /// embedding_dim`) and freeze it for the rest of the encoder's life.
    pub fn init_embedding_weight(&mut self, weight: Matrix) -> Result<(), ModelError> {
        self.embedding.load_pretrained(weight)
    }
}

impl Module for Encoder {
    fn parameters(&mut self) -> Vec<&mut Param> {
        let mut params = self.embedding.parameters();
        params.extend(self.rnn.parameters());
        params
    }
}

/// Sum the forward and backward halves of a `(batch, time, 2 * hidden)`
/// tensor.
fn merge_directions(t: &Tensor, hidden: usize) -> Tensor {
    let (b, time) = (t.shape[0], t.shape[1]);
    let mut out = Tensor::zeros(vec![b, time, hidden]);
    for i in 0..b {
        for j in 0..time {
            let lane = t.lane(&[i, j]);
            for (o, (f, r)) in out
                .lane_mut(&[i, j])
                .iter_mut()
                .zip(lane[..hidden].iter().zip(&lane[hidden..]))
            {
                *o = f + r;
            }
        }
    }
    out
}

pub(crate) fn check_shape(what: &'static str, expected: &[usize], t: &Tensor) -> Result<(), ModelError> {
    if t.shape != expected {
        return Err(ModelError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: t.shape.clone(),
        });
    }
    Ok(())
}
