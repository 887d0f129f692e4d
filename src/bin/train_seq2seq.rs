use std::env;
use std::error::Error;
use std::process;

use gruseq::config::{DecoderConfig, EncoderConfig, Seq2SeqConfig};
use gruseq::data::TokenBatch;
use gruseq::layers::Module;
use gruseq::math::{self, nll_loss};
use gruseq::models::{DecodePolicy, Seq2Seq};
use gruseq::optim::Adam;
use gruseq::rng::rng_from_env;
use gruseq::tokens::PAD_TOKEN_ID;
use indicatif::ProgressBar;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::Rng;

/// Ids below this are reserved for padding and the start sentinel.
const FIRST_WORD_ID: usize = 2;

struct Args {
    config: Option<String>,
    epochs: usize,
    batches_per_epoch: usize,
    batch_size: usize,
    lr: f32,
}

/// `train_seq2seq [--config PATH] [--epochs N] [--batches N] [--batch-size N] [--lr F]`
fn parse_cli<I>(mut args: I) -> Args
where
    I: Iterator<Item = String>,
{
    let mut parsed = Args {
        config: None,
        epochs: 20,
        batches_per_epoch: 50,
        batch_size: 16,
        lr: 0.01,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = args.next(),
            "--epochs" => {
                if let Some(v) = args.next() {
                    parsed.epochs = v.parse().unwrap_or(parsed.epochs);
                }
            }
            "--batches" => {
                if let Some(v) = args.next() {
                    parsed.batches_per_epoch = v.parse().unwrap_or(parsed.batches_per_epoch);
                }
            }
            "--batch-size" => {
                if let Some(v) = args.next() {
                    parsed.batch_size = v.parse().unwrap_or(parsed.batch_size);
                }
            }
            "--lr" => {
                if let Some(v) = args.next() {
                    parsed.lr = v.parse().unwrap_or(parsed.lr);
                }
            }
            other => warn!("ignoring unknown argument {other}"),
        }
    }
    parsed
}

fn default_config() -> Seq2SeqConfig {
    Seq2SeqConfig {
        encoder: EncoderConfig::new(12, 16, 32).bidirectional(true),
        decoder: DecoderConfig::new(12, 16, 32, 6),
    }
}

fn main() {
    env_logger::init();
    let args = parse_cli(env::args().skip(1));
    let config = match &args.config {
        Some(path) => match Seq2SeqConfig::from_path(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{path}: {e}");
                process::exit(1);
            }
        },
        None => default_config(),
    };
    if let Err(e) = run(&args, config) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

/// Teach the model to reverse random word sequences.
fn run(args: &Args, config: Seq2SeqConfig) -> Result<(), Box<dyn Error>> {
    let mut rng = rng_from_env();
    let vocab_size = config.encoder.vocab_size.min(config.decoder.vocab_size);
    let max_len = config.decoder.max_seq_len;
    if vocab_size <= FIRST_WORD_ID {
        return Err(format!("vocab_size must exceed {FIRST_WORD_ID}").into());
    }
    let mut model = Seq2Seq::with_rng(config, &mut rng)?;
    let mut adam = Adam::new(args.lr, 0.9, 0.999, 1e-8, 0.0);
    info!(
        "training on reversal task: {} trainable parameters",
        model.num_parameters()
    );

    let pb = ProgressBar::new(args.epochs as u64);
    for epoch in 0..args.epochs {
        math::reset_matrix_ops();
        let mut epoch_loss = 0.0f32;
        for _ in 0..args.batches_per_epoch {
            let (source, target) = reversal_batch(&mut rng, args.batch_size, vocab_size, max_len)?;
            model.zero_grad();
            let (out, cache) =
                model.forward_train(&source, DecodePolicy::TeacherForcing(&target), &mut rng)?;
            let (loss, grad) = nll_loss(&out.logits, target.ids(), PAD_TOKEN_ID);
            model.backward(&cache, &grad)?;
            adam.step(&mut model.parameters());
            epoch_loss += loss;
        }
        let mean = epoch_loss / args.batches_per_epoch.max(1) as f32;
        info!(
            "epoch {epoch} loss {mean:.4} matrix ops {}",
            math::matrix_ops_count()
        );
        pb.set_message(format!("loss {mean:.4}"));
        pb.inc(1);
    }
    pb.finish();

    let (source, target) = reversal_batch(&mut rng, 1, vocab_size, max_len)?;
    let predicted: Vec<usize> = model
        .generate(&source)?
        .iter()
        .map(|step| step[0])
        .collect();
    println!(
        "source {:?} expected {:?} predicted {:?}",
        &source.ids()[0][..source.lengths()[0]],
        &target.ids()[0][..target.lengths()[0]],
        predicted
    );
    Ok(())
}

/// Random sequences sorted by descending length and their reversals.
fn reversal_batch(
    rng: &mut StdRng,
    batch_size: usize,
    vocab_size: usize,
    max_len: usize,
) -> Result<(TokenBatch, TokenBatch), Box<dyn Error>> {
    let mut seqs: Vec<Vec<usize>> = (0..batch_size.max(1))
        .map(|_| {
            let len = rng.gen_range(1..=max_len);
            (0..len).map(|_| rng.gen_range(FIRST_WORD_ID..vocab_size)).collect()
        })
        .collect();
    seqs.sort_by(|a, b| b.len().cmp(&a.len()));
    let reversed = seqs.iter().map(|s| s.iter().rev().copied().collect()).collect();
    Ok((
        TokenBatch::from_sequences(seqs)?,
        TokenBatch::from_sequences(reversed)?,
    ))
}
