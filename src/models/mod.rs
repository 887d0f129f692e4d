pub mod decoder;
pub mod encoder;
pub mod seq2seq;

pub use decoder::{DecodePolicy, Decoder, DecoderCache, DecoderOutput};
pub use encoder::{Encoder, EncoderCache, EncoderOutput, PADDING_VALUE};
pub use seq2seq::{Seq2Seq, Seq2SeqCache};
