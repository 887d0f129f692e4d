//! Reserved token ids shared by the encoder, the decoder and whatever data
//! pipeline produces their batches.

/// Padding id. Never a real token; its embedding row receives no gradient.
pub const PAD_TOKEN_ID: usize = 0;

/// Start-of-sequence sentinel fed to the decoder at the first step.
pub const SOS_TOKEN_ID: usize = 1;
