use std::io::Write;

use gruseq::config::{DecoderConfig, EncoderConfig, Seq2SeqConfig};
use gruseq::device::Device;
use gruseq::error::ConfigError;
use gruseq::models::{Decoder, Encoder};
use tempfile::Builder;

fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_toml_with_defaults() {
    let file = write_temp(
        ".toml",
        r#"
        [encoder]
        vocab_size = 10
        embedding_dim = 4
        hidden_size = 6
        bidirectional = true
        num_layers = 2

        [decoder]
        vocab_size = 12
        embedding_dim = 5
        hidden_size = 6
        max_seq_len = 7
        num_layers = 2
        dropout_prob = 0.1
        "#,
    );
    let cfg = Seq2SeqConfig::from_path(file.path()).unwrap();
    assert!(cfg.encoder.bidirectional);
    assert_eq!(cfg.encoder.device, Device::Cpu);
    assert_eq!(cfg.decoder.max_seq_len, 7);
    assert_eq!(cfg.decoder.beam_size, 1);
    assert_eq!(cfg.decoder.dropout_prob, 0.1);
}

#[test]
fn loads_json_by_extension() {
    let file = write_temp(
        ".json",
        r#"{
            "encoder": {"vocab_size": 10, "embedding_dim": 4, "hidden_size": 6},
            "decoder": {"vocab_size": 10, "embedding_dim": 4, "hidden_size": 6,
                        "max_seq_len": 5, "beam_size": 3, "device": "cpu"}
        }"#,
    );
    let cfg = Seq2SeqConfig::from_path(file.path()).unwrap();
    assert_eq!(cfg.encoder.num_layers, 1);
    assert_eq!(cfg.decoder.beam_size, 3);
}

#[test]
fn unknown_device_is_rejected_on_load() {
    let file = write_temp(
        ".toml",
        r#"
        [encoder]
        vocab_size = 10
        embedding_dim = 4
        hidden_size = 6
        device = "cuda"

        [decoder]
        vocab_size = 10
        embedding_dim = 4
        hidden_size = 6
        max_seq_len = 5
        "#,
    );
    assert!(matches!(
        Seq2SeqConfig::from_path(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn hidden_size_mismatch_is_rejected_on_load() {
    let file = write_temp(
        ".toml",
        r#"
        [encoder]
        vocab_size = 10
        embedding_dim = 4
        hidden_size = 6

        [decoder]
        vocab_size = 10
        embedding_dim = 4
        hidden_size = 8
        max_seq_len = 5
        "#,
    );
    assert!(matches!(
        Seq2SeqConfig::from_path(file.path()),
        Err(ConfigError::Incompatible {
            field: "hidden_size",
            encoder: 6,
            decoder: 8
        })
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(matches!(
        Seq2SeqConfig::from_path(path),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn components_validate_at_construction() {
    assert!(matches!(
        Encoder::new(EncoderConfig::new(10, 4, 6).dropout_prob(1.5)),
        Err(ConfigError::DropoutOutOfRange(_))
    ));
    assert!(matches!(
        Decoder::new(DecoderConfig::new(10, 4, 6, 0)),
        Err(ConfigError::MissingField("max_seq_len"))
    ));
    assert!(Encoder::new(EncoderConfig::new(10, 4, 6).dropout_prob(0.2)).is_ok());
}
