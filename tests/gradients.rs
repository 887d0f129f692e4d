//! Central finite-difference checks of the hand-written backward passes.

use gruseq::config::{DecoderConfig, EncoderConfig, Seq2SeqConfig};
use gruseq::data::TokenBatch;
use gruseq::layers::Module;
use gruseq::math::nll_loss;
use gruseq::models::{DecodePolicy, Decoder, Encoder, Seq2Seq};
use gruseq::rng::seeded;
use gruseq::tensor::Tensor;
use gruseq::tokens::PAD_TOKEN_ID;
use rand::Rng;

const EPS: f32 = 1e-2;

fn assert_close(numeric: f32, analytic: f32, what: &str) {
    let tol = 5e-3 + 5e-2 * numeric.abs().max(analytic.abs());
    assert!(
        (numeric - analytic).abs() <= tol,
        "{what}: numeric {numeric} vs analytic {analytic}"
    );
}

fn random_like(shape: &[usize], seed: u64) -> Tensor {
    let mut rng = seeded(seed);
    let n = shape.iter().product();
    Tensor::new((0..n).map(|_| rng.gen_range(-1.0..1.0)).collect(), shape.to_vec())
}

fn dot(a: &Tensor, b: &Tensor) -> f32 {
    a.data.iter().zip(&b.data).map(|(x, y)| x * y).sum()
}

/// A handful of indices spread over `0..len`.
fn probes(len: usize) -> impl Iterator<Item = usize> {
    (0..len).step_by((len / 4).max(1))
}

/// Perturb every probed entry of every trainable parameter of `model` and
/// compare the central difference of `loss` against `analytic`.
fn check_parameters<M: Module>(
    model: &mut M,
    analytic: &[Vec<f32>],
    loss: impl Fn(&M) -> f32,
    label: &str,
) {
    for (p, grads) in analytic.iter().enumerate() {
        for i in probes(grads.len()) {
            let orig = model.parameters()[p].value.data[i];
            model.parameters()[p].value.data[i] = orig + EPS;
            let plus = loss(&*model);
            model.parameters()[p].value.data[i] = orig - EPS;
            let minus = loss(&*model);
            model.parameters()[p].value.data[i] = orig;
            let numeric = (plus - minus) / (2.0 * EPS);
            assert_close(numeric, grads[i], &format!("{label} param {p}[{i}]"));
        }
    }
}

fn analytic_grads<M: Module>(model: &mut M) -> Vec<Vec<f32>> {
    model
        .parameters()
        .iter()
        .map(|p| p.grad.data.clone())
        .collect()
}

fn source_batch() -> TokenBatch {
    TokenBatch::new(
        vec![vec![2, 3, 4, 5], vec![6, 7, 8, 0], vec![9, 0, 0, 0]],
        vec![4, 3, 1],
    )
    .unwrap()
}

fn check_encoder(config: EncoderConfig, seed: u64) {
    let mut enc = Encoder::with_rng(config, &mut seeded(seed)).unwrap();
    let batch = source_batch();
    let dropout_seed = seed + 100;
    let (out, cache) = enc.forward_train(&batch, &mut seeded(dropout_seed)).unwrap();
    let w_out = random_like(&out.output.shape, seed + 1);
    let w_hidden = random_like(&out.hidden.shape, seed + 2);

    enc.zero_grad();
    enc.backward(&cache, &w_out, &w_hidden).unwrap();
    let analytic = analytic_grads(&mut enc);

    // Reusing the seed replays the same dropout masks.
    let loss = |e: &Encoder| {
        let (o, _) = e.forward_train(&batch, &mut seeded(dropout_seed)).unwrap();
        dot(&o.output, &w_out) + dot(&o.hidden, &w_hidden)
    };
    check_parameters(&mut enc, &analytic, loss, "encoder");
}

#[test]
fn encoder_unidirectional_gradients() {
    check_encoder(EncoderConfig::new(10, 3, 4), 1);
}

#[test]
fn encoder_bidirectional_gradients() {
    check_encoder(EncoderConfig::new(10, 3, 4).bidirectional(true), 2);
}

#[test]
fn encoder_stacked_bidirectional_gradients_with_dropout() {
    check_encoder(
        EncoderConfig::new(10, 3, 4)
            .bidirectional(true)
            .num_layers(2)
            .dropout_prob(0.3),
        3,
    );
}

#[test]
fn decoder_gradients_including_initial_hidden() {
    let layers = 2;
    let config = DecoderConfig::new(10, 3, 4, 4).num_layers(layers);
    let mut dec = Decoder::with_rng(config, &mut seeded(4)).unwrap();
    let enc_out = random_like(&[2, 3, 4], 5);
    let hidden = random_like(&[layers, 2, 4], 6);
    // Unpadded targets: the PAD row is read in the forward pass but is never
    // trained, so feeding it would break the comparison.
    let targets = TokenBatch::from_sequences(vec![vec![3, 4, 5], vec![6, 7, 8]]).unwrap();
    let policy = DecodePolicy::TeacherForcing(&targets);

    let (out, cache) = dec
        .forward_train(&enc_out, &hidden, policy, &mut seeded(0))
        .unwrap();
    let w = random_like(&out.logits.shape, 7);
    dec.zero_grad();
    let grad_hidden = dec.backward(&cache, &w).unwrap();
    assert_eq!(grad_hidden.shape, hidden.shape);
    let analytic = analytic_grads(&mut dec);

    let loss_with = |d: &Decoder, h: &Tensor| {
        let o = d.forward(&enc_out, h, policy).unwrap();
        dot(&o.logits, &w)
    };
    check_parameters(&mut dec, &analytic, |d| loss_with(d, &hidden), "decoder");

    for i in probes(hidden.data.len()) {
        let mut plus = hidden.clone();
        plus.data[i] += EPS;
        let mut minus = hidden.clone();
        minus.data[i] -= EPS;
        let numeric = (loss_with(&dec, &plus) - loss_with(&dec, &minus)) / (2.0 * EPS);
        assert_close(numeric, grad_hidden.data[i], &format!("hidden[{i}]"));
    }
}

#[test]
fn seq2seq_nll_gradients_reach_the_encoder() {
    let config = Seq2SeqConfig {
        encoder: EncoderConfig::new(10, 3, 4).bidirectional(true),
        decoder: DecoderConfig::new(10, 3, 4, 4),
    };
    let mut model = Seq2Seq::with_rng(config, &mut seeded(8)).unwrap();
    let source = source_batch();
    let targets = TokenBatch::from_sequences(vec![
        vec![5, 4, 3, 2],
        vec![8, 7, 6, 5],
        vec![9, 8, 7, 6],
    ])
    .unwrap();
    let policy = DecodePolicy::TeacherForcing(&targets);

    let (out, cache) = model
        .forward_train(&source, policy, &mut seeded(0))
        .unwrap();
    let (_, grad) = nll_loss(&out.logits, targets.ids(), PAD_TOKEN_ID);
    model.zero_grad();
    model.backward(&cache, &grad).unwrap();
    let analytic = analytic_grads(&mut model);
    assert!(analytic
        .iter()
        .take(3)
        .any(|g| g.iter().any(|&v| v != 0.0)));

    let loss = |m: &Seq2Seq| {
        let o = m.forward(&source, policy).unwrap();
        nll_loss(&o.logits, targets.ids(), PAD_TOKEN_ID).0
    };
    check_parameters(&mut model, &analytic, loss, "seq2seq");
}
