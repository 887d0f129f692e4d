pub mod activation;
pub mod dropout;
pub mod embedding;
pub mod layer;
pub mod linear;
pub mod param;
pub mod rnn;

pub use dropout::Dropout;
pub use embedding::EmbeddingT;
pub use layer::Module;
pub use linear::LinearT;
pub use param::Param;
pub use rnn::{Gru, GruCache, GruCell, GruStackStepCache, GruStepCache};
