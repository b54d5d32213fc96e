// Two-layer LSTM language model on Penn Treebank, reported as perplexity.
//
// Expects ptb.train.txt, ptb.valid.txt and ptb.test.txt in --data-dir.
use std::path::PathBuf;

use candle::{DType, Device, Result, Tensor, D};
use candle_examples::{device, init_tracing, mask, Context};
use candle_nn::{ops, Embedding, LSTMConfig, Linear, Module, VarBuilder, VarMap, LSTM, RNN};
use candle_trainer::data::{padded_tensor, with_padding, Padding, PtbDataset, PtbOptions};
use candle_trainer::{
    ArrayIterator, InputSpec, LightModule, Momentum, ParamsMomentum, Solver, StepOutput, Trainer,
    TrainerConfig,
};
use clap::Parser;

const SENTENCE_LENGTH: usize = 60;
const EMBEDDING_SIZE: usize = 128;
const HIDDEN_SIZE: usize = 128;
const BATCH_SIZE: usize = 32;

#[derive(Parser, Debug)]
#[command(about = "LSTM language model training.")]
struct Args {
    /// Run on the cpu or on a cuda device.
    #[arg(long, short, value_enum, default_value_t = Context::Cpu)]
    context: Context,
    /// Device id when running on cuda.
    #[arg(long, short, default_value_t = 0)]
    device: usize,
    #[arg(long, default_value = "data/ptb")]
    data_dir: PathBuf,
    #[arg(long, default_value = "log/lstm-lm")]
    save_path: PathBuf,
    #[arg(long, default_value_t = 100)]
    epochs: usize,
    /// Log running metrics every n batches (0 disables).
    #[arg(long, default_value_t = 0)]
    log_every: usize,
    /// Continue from the latest snapshot in --save-path.
    #[arg(long)]
    resume: bool,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

struct LstmLm {
    embedding: Embedding,
    lstm1: LSTM,
    lstm2: LSTM,
    output: Linear,
    varmap: VarMap,
}

impl LstmLm {
    fn new(vocab_size: usize, dev: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, dev);
        let embedding = candle_nn::embedding(vocab_size, EMBEDDING_SIZE, vs.pp("embedding"))?;
        let lstm1 = candle_nn::lstm(EMBEDDING_SIZE, HIDDEN_SIZE, LSTMConfig::default(), vs.pp("lstm1"))?;
        let lstm2 = candle_nn::lstm(HIDDEN_SIZE, HIDDEN_SIZE, LSTMConfig::default(), vs.pp("lstm2"))?;
        let output = candle_nn::linear(HIDDEN_SIZE, vocab_size, vs.pp("output"))?;
        Ok(Self {
            embedding,
            lstm1,
            lstm2,
            output,
            varmap,
        })
    }
}

impl LightModule for LstmLm {
    fn forward(&mut self, inputs: &[Tensor], _train: bool) -> Result<StepOutput> {
        let (xs, ts) = (&inputs[0], &inputs[1]);
        let mask = mask(xs)?;

        let hs = self
            .embedding
            .forward(xs)?
            .broadcast_mul(&mask.unsqueeze(D::Minus1)?)?;
        let hs = self.lstm1.states_to_tensor(&self.lstm1.seq(&hs)?)?;
        let hs = self.lstm2.states_to_tensor(&self.lstm2.seq(&hs)?)?;
        let logits = hs.apply(&self.output)?;

        // pad positions are not predicted
        let log_sm = ops::log_softmax(&logits, D::Minus1)?;
        let nll = log_sm
            .gather(&ts.unsqueeze(D::Minus1)?, D::Minus1)?
            .squeeze(D::Minus1)?
            .neg()?;
        let loss = (nll * &mask)?.sum_all()?.div(&mask.sum_all()?)?;
        Ok(StepOutput::new(loss))
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

/// Inputs are the first `SENTENCE_LENGTH` ids, targets the same window shifted by one.
fn shifted_pairs(sentences: &[Vec<u32>]) -> Result<(Tensor, Tensor)> {
    let padded = with_padding(sentences, Padding::Post, Some(SENTENCE_LENGTH + 1))?;
    let data = padded_tensor(&padded, &Device::Cpu)?;
    let xs = data.narrow(1, 0, SENTENCE_LENGTH)?.contiguous()?;
    let ts = data.narrow(1, 1, SENTENCE_LENGTH)?.contiguous()?;
    Ok((xs, ts))
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let dev = device(args.context, args.device)?;

    let ptb = PtbDataset::load(&args.data_dir, PtbOptions::default())?;
    let vocab_size = ptb.words.len();
    let (x_train, t_train) = shifted_pairs(&ptb.train)?;
    let (x_valid, t_valid) = shifted_pairs(&ptb.valid)?;
    tracing::info!(
        vocab_size,
        train = ?x_train.shape(),
        valid = ?x_valid.shape(),
        "prepared ptb"
    );

    let model = LstmLm::new(vocab_size, &dev)?;
    let solver = Solver::<Momentum>::from_config(
        model.parameters(),
        ParamsMomentum {
            lr: 1e-2,
            momentum: 0.9,
        },
    )?;

    let placeholder = (BATCH_SIZE, SENTENCE_LENGTH);
    let config = TrainerConfig::new()
        .inputs(vec![InputSpec::new("x", placeholder), InputSpec::new("t", placeholder)])
        .metric("PPL", |step: &StepOutput| step.loss.exp())
        .save_path(&args.save_path)
        .device(dev)
        .log_every_n_steps(args.log_every);
    let mut trainer = Trainer::new(config, model, solver)?;
    if args.resume {
        match trainer.resume()? {
            Some(epoch) => tracing::info!(epoch, "resumed"),
            None => tracing::warn!(path = %args.save_path.display(), "no snapshot to resume from"),
        }
    }

    let mut train = ArrayIterator::new(vec![x_train, t_train], BATCH_SIZE)?.shuffle(args.seed);
    let mut valid = ArrayIterator::new(vec![x_valid, t_valid], BATCH_SIZE)?.shuffle(args.seed + 1);
    let history = trainer.run(&mut train, Some(&mut valid), args.epochs)?;

    if let Some(last) = history.last() {
        println!("epoch {}: {}", last.epoch + 1, last.train);
        if let Some(valid) = &last.valid {
            println!("epoch {}: {}", last.epoch + 1, valid);
        }
    }
    Ok(())
}
