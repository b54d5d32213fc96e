// fastText with bigram features for IMDB sentiment classification.
//
// See "Bag of Tricks for Efficient Text Classification". Expects the aclImdb
// directory (train/ and test/, each with pos/ and neg/) in --data-dir.
use std::path::PathBuf;

use candle::{DType, Device, Result, Tensor, D};
use candle_examples::{device, init_tracing, mask, Context};
use candle_nn::{loss, ops, AdamW, Embedding, Linear, Module, ParamsAdamW, VarBuilder, VarMap};
use candle_trainer::data::{load_imdb, padded_tensor, with_padding, BigramTable, Padding};
use candle_trainer::{
    ArrayIterator, InputSpec, LightModule, Loss, MetricSet, Output, Solver, StepOutput, Trainer,
    TrainerConfig,
};
use clap::Parser;

const MAX_LEN: usize = 400;
const BATCH_SIZE: usize = 32;
const EMBEDDING_SIZE: usize = 50;
const VOCAB_SIZE: usize = 20000;

#[derive(Parser, Debug)]
#[command(about = "fastText text classification training.")]
struct Args {
    /// Run on the cpu or on a cuda device.
    #[arg(long, short, value_enum, default_value_t = Context::Cpu)]
    context: Context,
    /// Device id when running on cuda.
    #[arg(long, short, default_value_t = 0)]
    device: usize,
    #[arg(long, default_value = "data/aclImdb")]
    data_dir: PathBuf,
    #[arg(long, default_value = "log/fasttext")]
    save_path: PathBuf,
    #[arg(long, default_value_t = 5)]
    epochs: usize,
    #[arg(long, default_value_t = 0)]
    log_every: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

struct FastText {
    embedding: Embedding,
    output: Linear,
    varmap: VarMap,
}

impl FastText {
    fn new(vocab_size: usize, dev: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, dev);
        let embedding = candle_nn::embedding(vocab_size, EMBEDDING_SIZE, vs.pp("embedding"))?;
        let output = candle_nn::linear(EMBEDDING_SIZE, 1, vs.pp("output"))?;
        Ok(Self {
            embedding,
            output,
            varmap,
        })
    }

    /// Mean of the word and bigram embeddings, padding excluded.
    fn pooled(&self, xs: &Tensor) -> Result<Tensor> {
        let mask = mask(xs)?;
        let count = mask.sum_keepdim(1)?.maximum(1f32)?;
        self.embedding
            .forward(xs)?
            .broadcast_mul(&mask.unsqueeze(D::Minus1)?)?
            .sum(1)?
            .broadcast_div(&count)
    }
}

impl LightModule for FastText {
    fn forward(&mut self, inputs: &[Tensor], _train: bool) -> Result<StepOutput> {
        let (xs, ts) = (&inputs[0], &inputs[1]);
        let logits = self.pooled(xs)?.apply(&self.output)?;
        let loss = loss::binary_cross_entropy_with_logit(&logits, ts)?;

        let probs = ops::sigmoid(&logits)?;
        let accuracy = probs
            .ge(0.5f32)?
            .to_dtype(DType::F32)?
            .eq(ts)?
            .to_dtype(DType::F32)?
            .mean_all()?;
        Ok(StepOutput::new(loss).with_output("accuracy", accuracy))
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

fn features(
    docs: &[Vec<u32>],
    labels: Vec<f32>,
    bigrams: &BigramTable,
) -> Result<(Tensor, Tensor)> {
    let augmented: Vec<Vec<u32>> = docs.iter().map(|doc| bigrams.augment(doc)).collect();
    let padded = with_padding(&augmented, Padding::Post, Some(MAX_LEN))?;
    let xs = padded_tensor(&padded, &Device::Cpu)?;
    let n = labels.len();
    let ts = Tensor::from_vec(labels, (n, 1), &Device::Cpu)?;
    Ok((xs, ts))
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let dev = device(args.context, args.device)?;

    let imdb = load_imdb(&args.data_dir, VOCAB_SIZE)?;
    let bigrams = BigramTable::build(&imdb.x_train, VOCAB_SIZE as u32);
    let vocab_size = bigrams.vocab_size();
    let (x_train, t_train) = features(&imdb.x_train, imdb.y_train, &bigrams)?;
    let (x_test, t_test) = features(&imdb.x_test, imdb.y_test, &bigrams)?;
    tracing::info!(vocab_size, bigrams = bigrams.len(), "prepared imdb");

    let model = FastText::new(vocab_size, &dev)?;
    let solver = Solver::<AdamW>::from_config(
        model.parameters(),
        ParamsAdamW {
            weight_decay: 0.,
            ..Default::default()
        },
    )?;

    let config = TrainerConfig::new()
        .inputs(vec![
            InputSpec::new("x", (BATCH_SIZE, MAX_LEN)),
            InputSpec::new("t", (BATCH_SIZE, 1)),
        ])
        .metrics(
            MetricSet::new()
                .with("cross entropy", Loss)
                .with("accuracy", Output::new("accuracy")),
        )
        .save_path(&args.save_path)
        .device(dev)
        .log_every_n_steps(args.log_every);
    let mut trainer = Trainer::new(config, model, solver)?;

    let mut train = ArrayIterator::new(vec![x_train, t_train], BATCH_SIZE)?.shuffle(args.seed);
    let mut test = ArrayIterator::new(vec![x_test, t_test], BATCH_SIZE)?.shuffle(args.seed + 1);
    let history = trainer.run(&mut train, Some(&mut test), args.epochs)?;

    if let Some(valid) = history.last().and_then(|last| last.valid.as_ref()) {
        println!("test: {valid}");
    }
    Ok(())
}
