pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod layers;
pub mod math;
pub mod models;
pub mod optim;
pub mod rng;
pub mod tensor;
pub mod tokens;

pub use config::{DecoderConfig, EncoderConfig, Seq2SeqConfig};
pub use data::{PackedSequence, TokenBatch};
pub use error::{ConfigError, ModelError};
pub use models::{DecodePolicy, Decoder, DecoderOutput, Encoder, EncoderOutput, Seq2Seq};
