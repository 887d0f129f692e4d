use log::debug;
use rand::rngs::StdRng;
use rand::Rng;

use super::encoder::check_shape;
use crate::config::DecoderConfig;
use crate::data::TokenBatch;
use crate::error::{ConfigError, ModelError};
use crate::layers::{EmbeddingT, Gru, GruStackStepCache, LinearT, Module, Param};
use crate::math::{log_softmax_backward, Matrix};
use crate::rng::rng_from_env;
use crate::tensor::Tensor;
use crate::tokens::{PAD_TOKEN_ID, SOS_TOKEN_ID};

/// How the decoder picks the input for the next step.
#[derive(Debug, Clone, Copy)]
pub enum DecodePolicy<'a> {
    /// Feed the ground-truth token of the previous position. Positions past
    /// the target width are fed [`PAD_TOKEN_ID`].
    TeacherForcing(&'a TokenBatch),
    /// Feed back the most likely token of the previous step.
    Greedy,
}

/// Unidirectional GRU decoder with a vocabulary projection and log-softmax
/// at every step.
pub struct Decoder {
    config: DecoderConfig,
    pub embedding: EmbeddingT,
    pub rnn: Gru,
    pub projection: LinearT,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderOutput {
    /// `(batch, max_seq_len, vocab_size)` log-probabilities.
    pub logits: Tensor,
    /// One batch of token ids per step under [`DecodePolicy::Greedy`];
    /// empty under teacher forcing.
    pub predictions: Vec<Vec<usize>>,
}

struct StepCache {
    inputs: Vec<usize>,
    rnn: GruStackStepCache,
    top: Matrix,
    log_probs: Matrix,
}

/// Per-call state kept by [`Decoder::forward_train`].
pub struct DecoderCache {
    steps: Vec<StepCache>,
    batch_size: usize,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Result<Self, ConfigError> {
        let mut rng = rng_from_env();
        Self::with_rng(config, &mut rng)
    }

    pub fn with_rng<R: Rng + ?Sized>(config: DecoderConfig, rng: &mut R) -> Result<Self, ConfigError> {
        config.validate()?;
        debug!(
            "decoder: vocab={} emb={} hidden={} layers={} max_seq_len={} dropout={} device={}",
            config.vocab_size,
            config.embedding_dim,
            config.hidden_size,
            config.num_layers,
            config.max_seq_len,
            config.dropout_prob,
            config.device
        );
        if config.beam_size > 1 {
            debug!(
                "beam_size = {} is ignored, decoding is greedy",
                config.beam_size
            );
        }
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
            false,
            config.dropout_prob,
            rng,
        );
        let projection = LinearT::new(config.hidden_size, config.vocab_size, rng);
        Ok(Self {
            config,
            embedding,
            rnn,
            projection,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Run exactly `max_seq_len` steps starting from `encoder_hidden`
    /// (`num_layers × batch × hidden_size`). Dropout is never applied here.
    pub fn forward(
        &self,
        encoder_output: &Tensor,
        encoder_hidden: &Tensor,
        policy: DecodePolicy<'_>,
    ) -> Result<DecoderOutput, ModelError> {
        self.run(encoder_output, encoder_hidden, policy, None)
            .map(|(out, _)| out)
    }

    /// Like [`Decoder::forward`] but with inter-layer dropout drawn from
    /// `rng`, also returning what [`Decoder::backward`] needs.
    pub fn forward_train(
        &self,
        encoder_output: &Tensor,
        encoder_hidden: &Tensor,
        policy: DecodePolicy<'_>,
        rng: &mut StdRng,
    ) -> Result<(DecoderOutput, DecoderCache), ModelError> {
        self.run(encoder_output, encoder_hidden, policy, Some(rng))
    }

    fn run(
        &self,
        encoder_output: &Tensor,
        encoder_hidden: &Tensor,
        policy: DecodePolicy<'_>,
        mut rng: Option<&mut StdRng>,
    ) -> Result<(DecoderOutput, DecoderCache), ModelError> {
        if encoder_output.shape.len() != 3 {
            return Err(ModelError::RankMismatch {
                what: "encoder output",
                expected: 3,
                actual: encoder_output.shape.clone(),
            });
        }
        let batch = encoder_output.shape[0];
        check_shape(
            "decoder initial hidden",
            &[self.config.num_layers, batch, self.config.hidden_size],
            encoder_hidden,
        )?;
        if let DecodePolicy::TeacherForcing(targets) = policy {
            if targets.batch_size() != batch {
                return Err(ModelError::BatchSizeMismatch {
                    expected: batch,
                    actual: targets.batch_size(),
                });
            }
            targets.check_vocab(self.config.vocab_size)?;
        }

        let mut hidden = encoder_hidden.unstack();
        let mut inputs = vec![SOS_TOKEN_ID; batch];
        let mut step_logits = Vec::with_capacity(self.config.max_seq_len);
        let mut steps = Vec::with_capacity(self.config.max_seq_len);
        let mut predictions = Vec::new();
        for t in 0..self.config.max_seq_len {
            let (log_probs, next_hidden, rnn, top) =
                self.advance(&inputs, &hidden, rng.as_deref_mut());
            let next_inputs = match policy {
                DecodePolicy::TeacherForcing(targets) => targets.column(t),
                DecodePolicy::Greedy => {
                    let best = log_probs.argmax_rows();
                    predictions.push(best.clone());
                    best
                }
            };
            step_logits.push(log_probs.clone());
            steps.push(StepCache {
                inputs: std::mem::replace(&mut inputs, next_inputs),
                rnn,
                top,
                log_probs,
            });
            hidden = next_hidden;
        }

        // (time, batch, vocab) -> (batch, time, vocab)
        let logits = Tensor::stack(&step_logits).transpose_01();
        let cache = DecoderCache {
            steps,
            batch_size: batch,
        };
        Ok((
            DecoderOutput {
                logits,
                predictions,
            },
            cache,
        ))
    }

    /// One decoding step: embed `inputs`, advance the GRU from
    /// `prev_hidden` (`num_layers × batch × hidden_size`) and return the
    /// log-probabilities `(batch × vocab_size)` with the new hidden state.
    ///
    /// Touches no state of its own.
    pub fn step(&self, inputs: &[usize], prev_hidden: &Tensor) -> Result<(Matrix, Tensor), ModelError> {
        if let Some(&token) = inputs.iter().find(|&&t| t >= self.config.vocab_size) {
            return Err(ModelError::TokenOutOfRange {
                token,
                vocab_size: self.config.vocab_size,
            });
        }
        check_shape(
            "decoder hidden",
            &[self.config.num_layers, inputs.len(), self.config.hidden_size],
            prev_hidden,
        )?;
        let (log_probs, hidden, _, _) = self.advance(inputs, &prev_hidden.unstack(), None);
        Ok((log_probs, Tensor::stack(&hidden)))
    }

    fn advance(
        &self,
        inputs: &[usize],
        hidden: &[Matrix],
        rng: Option<&mut StdRng>,
    ) -> (Matrix, Vec<Matrix>, GruStackStepCache, Matrix) {
        let embedded = self.embedding.forward(inputs);
        let (top, next_hidden, cache) = self.rnn.step(&embedded, hidden, rng);
        let log_probs = self.projection.forward(&top).log_softmax();
        (log_probs, next_hidden, cache, top)
    }

    /// Back-propagate `grad_logits` (`batch × max_seq_len × vocab_size`)
    /// through every step, accumulating parameter gradients. Returns the
    /// gradient with respect to the initial hidden state.
    pub fn backward(&mut self, cache: &DecoderCache, grad_logits: &Tensor) -> Result<Tensor, ModelError> {
        let batch = cache.batch_size;
        check_shape(
            "decoder logits gradient",
            &[batch, cache.steps.len(), self.config.vocab_size],
            grad_logits,
        )?;
        let grads = grad_logits.transpose_01().unstack();
        let mut grad_hidden =
            vec![Matrix::zeros(batch, self.config.hidden_size); self.config.num_layers];
        for (step, grad) in cache.steps.iter().zip(&grads).rev() {
            let grad_proj = log_softmax_backward(&step.log_probs, grad);
            let grad_top = self.projection.backward(&step.top, &grad_proj);
            let (grad_emb, grad_prev) = self.rnn.step_backward(&step.rnn, &grad_top, &grad_hidden);
            self.embedding.backward(&step.inputs, &grad_emb);
            grad_hidden = grad_prev;
        }
        Ok(Tensor::stack(&grad_hidden))
    }

    /// Replace the embedding table with `weight` (`vocab_size ×
    /// embedding_dim`) and freeze it for the rest of the decoder's life.
    pub fn init_embedding_weight(&mut self, weight: Matrix) -> Result<(), ModelError> {
        self.embedding.load_pretrained(weight)
    }
}

impl Module for Decoder {
    fn parameters(&mut self) -> Vec<&mut Param> {
        let mut params = self.embedding.parameters();
        params.extend(self.rnn.parameters());
        params.extend(self.projection.parameters());
        params
    }
}
