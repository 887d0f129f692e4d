use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::device::Device;
use crate::error::ConfigError;

fn default_num_layers() -> usize {
    1
}

fn default_beam_size() -> usize {
    1
}

/// Encoder hyper-parameters.
///
/// `vocab_size`, `embedding_dim` and `hidden_size` are required; the rest
/// default to a single unidirectional layer without dropout on the CPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_size: usize,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    #[serde(default)]
    pub dropout_prob: f32,
    #[serde(default)]
    pub device: Device,
}

impl EncoderConfig {
    pub fn new(vocab_size: usize, embedding_dim: usize, hidden_size: usize) -> Self {
        Self {
            vocab_size,
            embedding_dim,
            hidden_size,
            bidirectional: false,
            num_layers: default_num_layers(),
            dropout_prob: 0.0,
            device: Device::Cpu,
        }
    }

    pub fn bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    pub fn num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn dropout_prob(mut self, p: f32) -> Self {
        self.dropout_prob = p;
        self
    }

    /// Number of recurrent directions (1 or 2).
    pub fn num_directions(&self) -> usize {
        if self.bidirectional {
            2
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require("vocab_size", self.vocab_size)?;
        require("embedding_dim", self.embedding_dim)?;
        require("hidden_size", self.hidden_size)?;
        require("num_layers", self.num_layers)?;
        check_dropout(self.dropout_prob)
    }
}

/// Decoder hyper-parameters.
///
/// `beam_size` is accepted for compatibility with existing configuration
/// files; generation is always greedy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_size: usize,
    pub max_seq_len: usize,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    #[serde(default)]
    pub dropout_prob: f32,
    #[serde(default)]
    pub device: Device,
    #[serde(default = "default_beam_size")]
    pub beam_size: usize,
}

impl DecoderConfig {
    pub fn new(
        vocab_size: usize,
        embedding_dim: usize,
        hidden_size: usize,
        max_seq_len: usize,
    ) -> Self {
        Self {
            vocab_size,
            embedding_dim,
            hidden_size,
            max_seq_len,
            num_layers: default_num_layers(),
            dropout_prob: 0.0,
            device: Device::Cpu,
            beam_size: default_beam_size(),
        }
    }

    pub fn num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn dropout_prob(mut self, p: f32) -> Self {
        self.dropout_prob = p;
        self
    }

    pub fn beam_size(mut self, beam_size: usize) -> Self {
        self.beam_size = beam_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require("vocab_size", self.vocab_size)?;
        require("embedding_dim", self.embedding_dim)?;
        require("hidden_size", self.hidden_size)?;
        require("max_seq_len", self.max_seq_len)?;
        require("num_layers", self.num_layers)?;
        require("beam_size", self.beam_size)?;
        check_dropout(self.dropout_prob)
    }
}

/// Both halves of a sequence-to-sequence model, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seq2SeqConfig {
    pub encoder: EncoderConfig,
    pub decoder: DecoderConfig,
}

impl Seq2SeqConfig {
    /// Load configuration from the given path.  Supports TOML or JSON based on
    /// the file extension. The result is validated before it is returned.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("json"));
        let cfg: Seq2SeqConfig = if is_json {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate both halves plus the invariants the encoder-to-decoder
    /// hidden-state hand-off depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encoder.validate()?;
        self.decoder.validate()?;
        if self.encoder.num_layers != self.decoder.num_layers {
            return Err(ConfigError::Incompatible {
                field: "num_layers",
                encoder: self.encoder.num_layers,
                decoder: self.decoder.num_layers,
            });
        }
        if self.encoder.hidden_size != self.decoder.hidden_size {
            return Err(ConfigError::Incompatible {
                field: "hidden_size",
                encoder: self.encoder.hidden_size,
                decoder: self.decoder.hidden_size,
            });
        }
        Ok(())
    }
}

fn require(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::MissingField(name))
    } else {
        Ok(())
    }
}

fn check_dropout(p: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(ConfigError::DropoutOutOfRange(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_take_defaults() {
        let src = r#"
            [encoder]
            vocab_size = 10
            embedding_dim = 4
            hidden_size = 6

            [decoder]
            vocab_size = 10
            embedding_dim = 4
            hidden_size = 6
            max_seq_len = 5
        "#;
        let cfg: Seq2SeqConfig = toml::from_str(src).unwrap();
        assert!(!cfg.encoder.bidirectional);
        assert_eq!(cfg.encoder.num_layers, 1);
        assert_eq!(cfg.encoder.dropout_prob, 0.0);
        assert_eq!(cfg.encoder.device, Device::Cpu);
        assert_eq!(cfg.decoder.beam_size, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_required_field_fails_to_parse() {
        let src = r#"{"vocab_size": 10, "embedding_dim": 4}"#;
        assert!(serde_json::from_str::<EncoderConfig>(src).is_err());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = EncoderConfig::new(10, 0, 6).validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("embedding_dim")));
    }

    #[test]
    fn dropout_must_be_a_probability() {
        let err = DecoderConfig::new(10, 4, 6, 5)
            .dropout_prob(1.01)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DropoutOutOfRange(_)));
        let err = EncoderConfig::new(10, 4, 6)
            .dropout_prob(-0.1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DropoutOutOfRange(_)));
    }

    #[test]
    fn dropout_bounds_are_inclusive() {
        assert!(EncoderConfig::new(10, 4, 6).dropout_prob(1.0).validate().is_ok());
        assert!(DecoderConfig::new(10, 4, 6, 5).dropout_prob(0.0).validate().is_ok());
    }

    #[test]
    fn layer_counts_must_agree() {
        let cfg = Seq2SeqConfig {
            encoder: EncoderConfig::new(10, 4, 6).num_layers(2),
            decoder: DecoderConfig::new(10, 4, 6, 5),
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Incompatible { field: "num_layers", .. })
        ));
    }
}
