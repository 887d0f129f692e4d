use std::fmt;

/// Problems detected while building or loading a component configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A required size was absent or zero.
    MissingField(&'static str),
    DropoutOutOfRange(f32),
    UnsupportedDevice(String),
    /// Encoder and decoder disagree on a value that must be shared.
    Incompatible {
        field: &'static str,
        encoder: usize,
        decoder: usize,
    },
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingField(name) => {
                write!(f, "required field `{}` is missing or zero", name)
            }
            ConfigError::DropoutOutOfRange(p) => {
                write!(f, "dropout_prob must be in [0, 1], got {}", p)
            }
            ConfigError::UnsupportedDevice(d) => write!(f, "unsupported device `{}`", d),
            ConfigError::Incompatible {
                field,
                encoder,
                decoder,
            } => write!(
                f,
                "encoder {} = {} does not match decoder {} = {}",
                field, encoder, field, decoder
            ),
            ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
            ConfigError::Parse(msg) => write!(f, "cannot parse config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Caller errors raised by the encoder and decoder entry points.
#[derive(Debug, PartialEq)]
pub enum ModelError {
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    RankMismatch {
        what: &'static str,
        expected: usize,
        actual: Vec<usize>,
    },
    EmptyBatch,
    /// Row `row` has a different width than row 0.
    RaggedBatch { row: usize, width: usize, expected: usize },
    LengthCountMismatch { rows: usize, lengths: usize },
    /// A length is zero or exceeds the padded width.
    InvalidLength { row: usize, length: usize, width: usize },
    /// Lengths must be sorted in descending order for packing.
    UnsortedLengths { row: usize },
    TokenOutOfRange { token: usize, vocab_size: usize },
    BatchSizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::ShapeMismatch {
                what,
                expected,
                actual,
            } => write!(
                f,
                "{}: expected shape {:?}, got {:?}",
                what, expected, actual
            ),
            ModelError::RankMismatch {
                what,
                expected,
                actual,
            } => write!(
                f,
                "{}: expected {} axes, got shape {:?}",
                what, expected, actual
            ),
            ModelError::EmptyBatch => write!(f, "batch is empty"),
            ModelError::RaggedBatch {
                row,
                width,
                expected,
            } => write!(
                f,
                "row {} has width {} but the batch is padded to {}",
                row, width, expected
            ),
            ModelError::LengthCountMismatch { rows, lengths } => {
                write!(f, "{} sequences but {} lengths", rows, lengths)
            }
            ModelError::InvalidLength { row, length, width } => write!(
                f,
                "row {} has length {} outside 1..={}",
                row, length, width
            ),
            ModelError::UnsortedLengths { row } => write!(
                f,
                "lengths must be sorted in descending order (violated at row {})",
                row
            ),
            ModelError::TokenOutOfRange { token, vocab_size } => {
                write!(f, "token id {} outside vocabulary of {}", token, vocab_size)
            }
            ModelError::BatchSizeMismatch { expected, actual } => {
                write!(f, "expected batch of {}, got {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for ModelError {}
