use rand::rngs::StdRng;
use rand::Rng;

use super::decoder::{DecodePolicy, Decoder, DecoderCache, DecoderOutput};
use super::encoder::{Encoder, EncoderCache};
use crate::config::Seq2SeqConfig;
use crate::data::TokenBatch;
use crate::error::{ConfigError, ModelError};
use crate::layers::{Module, Param};
use crate::rng::rng_from_env;
use crate::tensor::Tensor;

/// An encoder and a decoder wired together. The encoder's merged final
/// hidden state seeds the decoder; gradients flow back the same way.
pub struct Seq2Seq {
    pub encoder: Encoder,
    pub decoder: Decoder,
}

pub struct Seq2SeqCache {
    encoder: EncoderCache,
    decoder: DecoderCache,
    encoder_output_shape: Vec<usize>,
}

impl Seq2Seq {
    pub fn new(config: Seq2SeqConfig) -> Result<Self, ConfigError> {
        let mut rng = rng_from_env();
        Self::with_rng(config, &mut rng)
    }

    pub fn with_rng<R: Rng + ?Sized>(config: Seq2SeqConfig, rng: &mut R) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            encoder: Encoder::with_rng(config.encoder, rng)?,
            decoder: Decoder::with_rng(config.decoder, rng)?,
        })
    }

    pub fn forward(
        &self,
        source: &TokenBatch,
        policy: DecodePolicy<'_>,
    ) -> Result<DecoderOutput, ModelError> {
        let enc = self.encoder.forward(source)?;
        self.decoder.forward(&enc.output, &enc.hidden, policy)
    }

    /// Greedy predictions, one batch of token ids per decoder step.
    pub fn generate(&self, source: &TokenBatch) -> Result<Vec<Vec<usize>>, ModelError> {
        self.forward(source, DecodePolicy::Greedy)
            .map(|out| out.predictions)
    }

    pub fn forward_train(
        &self,
        source: &TokenBatch,
        policy: DecodePolicy<'_>,
        rng: &mut StdRng,
    ) -> Result<(DecoderOutput, Seq2SeqCache), ModelError> {
        let (enc, encoder) = self.encoder.forward_train(source, rng)?;
        let (out, decoder) = self
            .decoder
            .forward_train(&enc.output, &enc.hidden, policy, rng)?;
        let cache = Seq2SeqCache {
            encoder,
            decoder,
            encoder_output_shape: enc.output.shape,
        };
        Ok((out, cache))
    }

    /// Push `grad_logits` through the decoder and on into the encoder via the
    /// hidden-state hand-off. The decoder does not read the encoder output
    /// itself, so that path carries no gradient.
    pub fn backward(&mut self, cache: &Seq2SeqCache, grad_logits: &Tensor) -> Result<(), ModelError> {
        let grad_hidden = self.decoder.backward(&cache.decoder, grad_logits)?;
        let grad_output = Tensor::zeros(cache.encoder_output_shape.clone());
        self.encoder
            .backward(&cache.encoder, &grad_output, &grad_hidden)
    }
}

impl Module for Seq2Seq {
    fn parameters(&mut self) -> Vec<&mut Param> {
        let mut params = self.encoder.parameters();
        params.extend(self.decoder.parameters());
        params
    }
}
