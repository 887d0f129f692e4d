use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gruseq::config::{DecoderConfig, EncoderConfig};
use gruseq::data::TokenBatch;
use gruseq::models::{DecodePolicy, Decoder, Encoder};
use gruseq::rng::seeded;
use rand::Rng;

fn random_batch(batch: usize, max_len: usize, vocab: usize) -> TokenBatch {
    let mut rng = seeded(42);
    let mut seqs: Vec<Vec<usize>> = (0..batch)
        .map(|_| {
            let len = rng.gen_range(1..=max_len);
            (0..len).map(|_| rng.gen_range(2..vocab)).collect()
        })
        .collect();
    seqs.sort_by(|a, b| b.len().cmp(&a.len()));
    TokenBatch::from_sequences(seqs).unwrap()
}

fn bench_gru(c: &mut Criterion) {
    let mut rng = seeded(0);
    let vocab = 64;
    let batch = random_batch(16, 24, vocab);

    let encoder = Encoder::with_rng(
        EncoderConfig::new(vocab, 32, 64).bidirectional(true).num_layers(2),
        &mut rng,
    )
    .unwrap();
    let decoder = Decoder::with_rng(DecoderConfig::new(vocab, 32, 64, 24).num_layers(2), &mut rng)
        .unwrap();

    c.bench_function("encoder_forward_bidirectional", |b| {
        b.iter(|| {
            let out = encoder.forward(black_box(&batch)).unwrap();
            black_box(out);
        });
    });

    let enc = encoder.forward(&batch).unwrap();
    c.bench_function("decoder_forward_greedy", |b| {
        b.iter(|| {
            let out = decoder
                .forward(black_box(&enc.output), black_box(&enc.hidden), DecodePolicy::Greedy)
                .unwrap();
            black_box(out);
        });
    });
}

criterion_group!(benches, bench_gru);
criterion_main!(benches);
