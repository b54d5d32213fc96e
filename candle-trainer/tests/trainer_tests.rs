use anyhow::Result;
use candle::{DType, Device, Tensor};
use candle_nn::{Init, Linear, Module, Optimizer, VarMap, SGD};
use candle_trainer::{
    ArrayIterator, BatchValues, Callback, EpochSummary, InputSpec, LightModule, Loss,
    MetricSet, Output, PlotFormat, Solver, StepOutput, Trainer, TrainerConfig, UpdateRule,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct LinearModel {
    linear: Linear,
    varmap: VarMap,
}

impl LinearModel {
    fn new(device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let w = varmap.get((1, 2), "w", Init::Const(0.), DType::F32, device)?;
        let b = varmap.get((), "b", Init::Const(0.), DType::F32, device)?;
        let linear = Linear::new(w, Some(b));
        Ok(Self { linear, varmap })
    }

    fn var(&self, name: &str) -> Tensor {
        self.varmap.data().lock().unwrap()[name].as_tensor().clone()
    }
}

impl LightModule for LinearModel {
    fn forward(&mut self, inputs: &[Tensor], _train: bool) -> candle::Result<StepOutput> {
        let ys = self.linear.forward(&inputs[0])?;
        let loss = ys.sub(&inputs[1])?.sqr()?.sum_all()?;
        let abs_err = ys.sub(&inputs[1])?.abs()?.mean_all()?;
        Ok(StepOutput::new(loss).with_output("abs err", abs_err))
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

/// A loss that is 1.0 on every batch.
struct ConstantModel {
    varmap: VarMap,
}

impl ConstantModel {
    fn new() -> Result<Self> {
        let varmap = VarMap::new();
        varmap.get((1,), "w", Init::Const(0.5), DType::F32, &Device::Cpu)?;
        Ok(Self { varmap })
    }
}

impl LightModule for ConstantModel {
    fn forward(&mut self, inputs: &[Tensor], _train: bool) -> candle::Result<StepOutput> {
        let w = self.varmap.all_vars().remove(0);
        let loss = ((w.sum_all()? * 0.)? + 1.)?;
        let rows = inputs[0].to_dtype(DType::F32)?.mean_all()?;
        Ok(StepOutput::new(loss).with_output("rows", rows))
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

#[derive(Default)]
struct CountingRule {
    updates: Arc<AtomicUsize>,
}

impl UpdateRule for CountingRule {
    fn zero_grad(&mut self) {}

    fn backward(&mut self, loss: &Tensor) -> candle::Result<()> {
        loss.backward()?;
        Ok(())
    }

    fn update(&mut self) -> candle::Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn rows(n: u32) -> Result<ArrayIterator> {
    let xs = Tensor::arange(0u32, n, &Device::Cpu)?.reshape((n as usize, 1))?;
    Ok(ArrayIterator::new(vec![xs], 2)?)
}

fn constant_config(dir: &std::path::Path) -> TrainerConfig {
    TrainerConfig::new()
        .inputs(vec![InputSpec::new("x", (2, 1))])
        .save_path(dir)
        .progress_bar(false)
}

#[test]
fn trainer_basic_training() -> Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;

    let w_gen = Tensor::new(&[[3f32, 1.]], &device)?;
    let b_gen = Tensor::new(-2f32, &device)?;
    let gen = Linear::new(w_gen, Some(b_gen));
    let sample_xs = Tensor::new(&[[2f32, 1.], [7., 4.], [-4., 12.], [5., 8.]], &device)?;
    let sample_ys = gen.forward(&sample_xs)?;
    let mut batches = ArrayIterator::new(vec![sample_xs, sample_ys], 4)?;

    let model = LinearModel::new(&device)?;
    let solver = Solver::new(SGD::new(model.parameters(), 0.004)?);

    let config = TrainerConfig::new()
        .inputs(vec![InputSpec::new("x", (4, 2)), InputSpec::new("y", (4, 1))])
        .save_path(dir.path())
        .progress_bar(false);
    let mut trainer = Trainer::new(config, model, solver)?;
    trainer.run(&mut batches, None, 1000)?;

    let w_vals = trainer.model().var("w").to_vec2::<f32>()?;
    let b_val = trainer.model().var("b").to_scalar::<f32>()?;

    assert!((w_vals[0][0] - 3.0).abs() < 0.01);
    assert!((w_vals[0][1] - 1.0).abs() < 0.01);
    assert!((b_val - (-2.0)).abs() < 0.03);
    assert_eq!(trainer.current_epoch(), 1000);

    Ok(())
}

#[test]
fn constant_loss_epoch_result() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut trainer = Trainer::new(constant_config(dir.path()), ConstantModel::new()?, CountingRule::default())?;

    let history = trainer.run(&mut rows(4)?, None, 1)?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].train.keys().collect::<Vec<_>>(), vec!["loss-train"]);
    assert_eq!(history[0].train.get("loss-train"), Some(1.0));
    assert!(history[0].valid.is_none());
    Ok(())
}

#[test]
fn update_cycles_per_batch_and_epoch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let updates = Arc::new(AtomicUsize::new(0));
    let rule = CountingRule {
        updates: updates.clone(),
    };
    let mut trainer = Trainer::new(constant_config(dir.path()), ConstantModel::new()?, rule)?;

    // 5 rows at batch size 2 make 2 batches per epoch.
    let history = trainer.run(&mut rows(5)?, Some(&mut rows(4)?), 3)?;
    assert_eq!(history.len(), 3);
    assert_eq!(updates.load(Ordering::SeqCst), 6);
    assert_eq!(trainer.current_epoch(), 3);

    // validation epochs never update
    assert!(history.iter().all(|h| h.valid.as_ref().and_then(|v| v.get("loss-valid")) == Some(1.0)));
    Ok(())
}

#[test]
fn epoch_results_are_means_of_their_own_batches() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = constant_config(dir.path()).metrics(MetricSet::new().with("rows", Output::new("rows")));
    let mut trainer = Trainer::new(config, ConstantModel::new()?, CountingRule::default())?;

    // rows 0..6 in order: batch means 0.5, 2.5, 4.5
    let mut source = rows(6)?;
    let history = trainer.run(&mut source, None, 2)?;
    assert_eq!(history[0].train.get("rows-train"), Some(2.5));
    assert_eq!(history[1].train.get("rows-train"), Some(2.5));

    let series = trainer.series().get("rows-train").unwrap();
    assert_eq!(series.points(), &[(1, 2.5), (2, 2.5)]);
    Ok(())
}

#[test]
fn metric_names_are_sanitized_and_written() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = constant_config(dir.path()).metrics(
        MetricSet::new()
            .with("cross entropy", Loss)
            .with("mean rows", Output::new("rows")),
    );
    let mut trainer = Trainer::new(config, ConstantModel::new()?, CountingRule::default())?;
    assert_eq!(
        trainer.metrics().names().collect::<Vec<_>>(),
        vec!["cross-entropy", "mean-rows"]
    );

    trainer.run(&mut rows(4)?, Some(&mut rows(4)?), 2)?;

    let ext = PlotFormat::default().extension();
    for file in [
        "cross-entropy-train.series.txt".to_string(),
        "cross-entropy-valid.series.txt".to_string(),
        "mean-rows-train.series.txt".to_string(),
        "mean-rows-valid.series.txt".to_string(),
        format!("cross-entropy.{ext}"),
        format!("mean-rows.{ext}"),
        "snapshot_epoch_1.safetensors".to_string(),
        "snapshot_epoch_2.safetensors".to_string(),
    ] {
        assert!(dir.path().join(&file).exists(), "missing {file}");
    }
    let text = std::fs::read_to_string(dir.path().join("cross-entropy-train.series.txt"))?;
    assert_eq!(text, "1 1\n2 1\n");
    Ok(())
}

#[test]
fn update_variables_rebinds_inputs_and_metrics() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut trainer = Trainer::new(constant_config(dir.path()), ConstantModel::new()?, CountingRule::default())?;
    assert_eq!(trainer.metrics().names().collect::<Vec<_>>(), vec!["loss"]);

    trainer.update_variables(
        vec![InputSpec::new("x", (4, 1))],
        MetricSet::new()
            .with("train loss", Loss)
            .with("mean rows", Output::new("rows")),
    )?;
    assert_eq!(trainer.batch_size(), 4);
    assert_eq!(
        trainer.metrics().names().collect::<Vec<_>>(),
        vec!["train-loss", "mean-rows"]
    );

    let xs = Tensor::arange(0u32, 8, &Device::Cpu)?.reshape((8, 1))?;
    let mut source = ArrayIterator::new(vec![xs], 4)?;
    let history = trainer.run(&mut source, None, 1)?;
    assert_eq!(
        history[0].train.keys().collect::<Vec<_>>(),
        vec!["train-loss-train", "mean-rows-train"]
    );
    assert!(dir.path().join("train-loss-train.series.txt").exists());
    assert!(dir.path().join("mean-rows-train.series.txt").exists());
    assert!(!dir.path().join("loss-train.series.txt").exists());

    // the old batch size no longer fits
    assert!(trainer.run(&mut rows(4)?, None, 1).is_err());

    // an empty input list is rejected and the previous binding stays
    assert!(trainer.update_variables(Vec::new(), MetricSet::new()).is_err());
    assert_eq!(trainer.inputs().len(), 1);
    assert_eq!(trainer.batch_size(), 4);
    assert_eq!(trainer.metrics().len(), 2);
    Ok(())
}

#[test]
fn mismatched_validation_source_fails_before_any_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let updates = Arc::new(AtomicUsize::new(0));
    let rule = CountingRule {
        updates: updates.clone(),
    };
    let mut trainer = Trainer::new(constant_config(dir.path()), ConstantModel::new()?, rule)?;

    let xs = Tensor::zeros((4, 1), DType::U32, &Device::Cpu)?;
    let mut two_vars = ArrayIterator::new(vec![xs.clone(), xs], 2)?;
    assert!(trainer.run(&mut rows(4)?, Some(&mut two_vars), 1).is_err());

    let mut wrong_batch = ArrayIterator::new(vec![Tensor::zeros((4, 1), DType::U32, &Device::Cpu)?], 4)?;
    assert!(trainer.run(&mut rows(4)?, Some(&mut wrong_batch), 1).is_err());

    assert_eq!(updates.load(Ordering::SeqCst), 0);
    assert_eq!(trainer.current_epoch(), 0);
    assert_eq!(trainer.series().keys().count(), 0);
    Ok(())
}

#[test]
fn evaluate_logs_against_last_epoch_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = constant_config(dir.path()).metrics(MetricSet::new().with("rows", Output::new("rows")));
    let mut trainer = Trainer::new(config, ConstantModel::new()?, CountingRule::default())?;
    trainer.run(&mut rows(4)?, None, 2)?;

    let first = trainer.evaluate(&mut rows(4)?)?;
    let second = trainer.evaluate(&mut rows(4)?)?;
    assert_eq!(first, second);
    assert_eq!(first.get("rows-valid"), Some(1.5));

    assert_eq!(trainer.current_epoch(), 2);
    assert!(!dir.path().join("snapshot_epoch_3.safetensors").exists());
    assert_eq!(
        trainer.series().get("rows-valid").unwrap().points(),
        &[(2, 1.5), (2, 1.5)]
    );
    let ext = PlotFormat::default().extension();
    assert!(dir.path().join(format!("rows.{ext}")).exists());
    Ok(())
}

#[test]
fn resume_restores_latest_snapshot() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let device = Device::Cpu;
    let xs = Tensor::new(&[[1f32, 2.], [3., 4.], [5., 6.], [7., 8.]], &device)?;
    let ys = Tensor::new(&[[1f32], [2.], [3.], [4.]], &device)?;
    let config = || {
        TrainerConfig::new()
            .inputs(vec![InputSpec::new("x", (4, 2)), InputSpec::new("y", (4, 1))])
            .save_path(dir.path())
            .progress_bar(false)
    };

    let model = LinearModel::new(&device)?;
    let solver = Solver::new(SGD::new(model.parameters(), 0.001)?);
    let mut trainer = Trainer::new(config(), model, solver)?;
    trainer.run(&mut ArrayIterator::new(vec![xs.clone(), ys.clone()], 4)?, None, 3)?;
    let trained = trainer.model().var("w").to_vec2::<f32>()?;

    let model = LinearModel::new(&device)?;
    let solver = Solver::new(SGD::new(model.parameters(), 0.001)?);
    let mut resumed = Trainer::new(config(), model, solver)?;
    assert_eq!(resumed.resume()?, Some(3));
    assert_eq!(resumed.current_epoch(), 3);
    assert_eq!(resumed.model().var("w").to_vec2::<f32>()?, trained);
    assert_eq!(resumed.series().get("loss-train").unwrap().len(), 3);

    resumed.run(&mut ArrayIterator::new(vec![xs, ys], 4)?, None, 1)?;
    assert!(dir.path().join("snapshot_epoch_4.safetensors").exists());
    assert_eq!(resumed.series().get("loss-train").unwrap().last().map(|p| p.0), Some(4));
    Ok(())
}

#[test]
fn shape_mismatch_aborts_the_epoch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = TrainerConfig::new()
        .inputs(vec![InputSpec::new("x", (2, 3))])
        .save_path(dir.path())
        .progress_bar(false);
    let mut trainer = Trainer::new(config, ConstantModel::new()?, CountingRule::default())?;
    assert!(trainer.run(&mut rows(4)?, None, 1).is_err());
    assert!(trainer.series().get("loss-train").is_none());
    Ok(())
}

#[test]
fn empty_inputs_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = TrainerConfig::new().save_path(dir.path());
    assert!(Trainer::new(config, ConstantModel::new()?, CountingRule::default()).is_err());
    Ok(())
}

struct CountingCallback {
    epoch_starts: Arc<AtomicUsize>,
    epoch_ends: Arc<AtomicUsize>,
    batch_ends: Arc<AtomicUsize>,
}

impl Callback for CountingCallback {
    fn on_epoch_start(&mut self, _epoch: usize) -> candle::Result<()> {
        self.epoch_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_epoch_end(&mut self, _epoch: usize, _summary: &EpochSummary) -> candle::Result<()> {
        self.epoch_ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_train_batch_end(&mut self, _batch_idx: usize, values: &BatchValues) -> candle::Result<()> {
        assert_eq!(values.get("loss"), Some(1.0));
        self.batch_ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn trainer_callback_invocation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let epoch_starts = Arc::new(AtomicUsize::new(0));
    let epoch_ends = Arc::new(AtomicUsize::new(0));
    let batch_ends = Arc::new(AtomicUsize::new(0));

    let callback = CountingCallback {
        epoch_starts: epoch_starts.clone(),
        epoch_ends: epoch_ends.clone(),
        batch_ends: batch_ends.clone(),
    };

    let mut trainer = Trainer::new(constant_config(dir.path()), ConstantModel::new()?, CountingRule::default())?
        .with_callback(callback);
    trainer.run(&mut rows(4)?, Some(&mut rows(4)?), 5)?;

    assert_eq!(epoch_starts.load(Ordering::SeqCst), 5);
    assert_eq!(epoch_ends.load(Ordering::SeqCst), 5);
    assert_eq!(batch_ends.load(Ordering::SeqCst), 10); // 2 batches * 5 epochs

    Ok(())
}

struct EarlyStopCallback {
    stop_at_epoch: usize,
    current_epoch: usize,
}

impl Callback for EarlyStopCallback {
    fn on_epoch_end(&mut self, _epoch: usize, _summary: &EpochSummary) -> candle::Result<()> {
        self.current_epoch += 1;
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.current_epoch >= self.stop_at_epoch
    }
}

#[test]
fn trainer_early_stopping() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stopper = EarlyStopCallback {
        stop_at_epoch: 3,
        current_epoch: 0,
    };

    let mut trainer = Trainer::new(constant_config(dir.path()), ConstantModel::new()?, CountingRule::default())?
        .with_callback(stopper);
    let history = trainer.run(&mut rows(4)?, None, 100)?;

    assert_eq!(history.len(), 3);
    assert_eq!(trainer.current_epoch(), 3);
    assert_eq!(trainer.checkpointer().latest()?, Some(3));

    Ok(())
}
