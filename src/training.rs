use burn::{
    config::Config,
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::{AutodiffModule, Module},
    nn::loss::{BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig, MseLoss, Reduction},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        cast::ToElement,
        Int, Tensor,
    },
};
use std::{collections::BTreeMap, error::Error, path::Path, sync::Arc};

use crate::{
    data::{SrBatch, SrBatcher, SrDataset},
    error::TrainError,
    model::{
        discriminator::{Discriminator, DiscriminatorRecord},
        generator::{Generator, GeneratorRecord},
        layers::Regularized,
        vgg19::{imagenet_norm, Vgg19},
        Model, ModelConfig,
    },
    utils::{psnr, save_mosaic, ssim, tensor_to_image},
};

// ////////////////////////////////////////////////////////////////////////////
// Configuration

#[derive(Config, Debug)]
pub struct PerceptualConfig {
    /// Keras-style VGG-19 layer name.
    #[config(default = "String::from(\"block2_conv2\")")]
    pub layer: String,
    #[config(default = 2e-6)]
    pub weight: f64,
    /// Record file with VGG-19 weights.
    pub weights: Option<String>,
}

impl PerceptualConfig {
    /// Builds the frozen feature extractor.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Vgg19<B>, TrainError> {
        let vgg = Vgg19::new(self.layer.parse()?, device);
        let vgg = match &self.weights {
            Some(path) => vgg.load(path, device)?,
            None => {
                log::warn!("no VGG-19 weights configured, perceptual features are untrained");
                vgg
            }
        };
        Ok(vgg.no_grad())
    }
}

#[derive(Config)]
pub struct TrainingConfig {
    #[config(default = "ModelConfig::new()")]
    pub model: ModelConfig,
    #[config(default = "AdamConfig::new()")]
    pub optimizer: AdamConfig,
    /// Last epoch of the reconstruction-only phase.
    #[config(default = 100)]
    pub init_epoch: usize,
    #[config(default = 1.0)]
    pub mse_weight: f64,
    #[config(default = 1e-3)]
    pub gan_weight: f64,
    pub perceptual: Option<PerceptualConfig>,
    #[config(default = 1e-4)]
    pub learning_rate: f64,
    /// Scale of every kernel regularizer.
    #[config(default = 0.0)]
    pub weight_decay: f64,
    #[config(default = 200)]
    pub epochs: usize,
    #[config(default = 16)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    /// Low-resolution patch side.
    #[config(default = 24)]
    pub patch_size: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn loss_weights(&self) -> GanLossWeights {
        GanLossWeights {
            mse: self.mse_weight,
            gan: self.gan_weight,
            perceptual: self.perceptual.as_ref().map_or(0.0, |p| p.weight),
        }
    }

    /// One Adam instance per role, each bound to the module it steps.
    pub fn optimizers<B: AutodiffBackend>(
        &self,
    ) -> OptimizerSet<impl Optimizer<Generator<B>, B>, impl Optimizer<Discriminator<B>, B>> {
        OptimizerSet {
            reconstruction: self.optimizer.init::<B, Generator<B>>(),
            generator: self.optimizer.init::<B, Generator<B>>(),
            discriminator: self.optimizer.init::<B, Discriminator<B>>(),
        }
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Scheduling

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    /// Generator only, pixel loss only.
    Pretrain,
    /// Discriminator step, then generator step on the composite loss.
    Adversarial,
}

impl TrainingPhase {
    pub fn at(epoch: usize, init_epoch: usize) -> Self {
        if epoch <= init_epoch {
            Self::Pretrain
        } else {
            Self::Adversarial
        }
    }
}

pub struct OptimizerSet<GO, DO> {
    pub reconstruction: GO,
    pub generator: GO,
    pub discriminator: DO,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GanLossWeights {
    pub mse: f64,
    pub gan: f64,
    pub perceptual: f64,
}

// ////////////////////////////////////////////////////////////////////////////
// Trainer

/// Maps images from `[0, 1]` to the generator's `[-1, 1]`.
fn normalize<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    images.mul_scalar(2.0).sub_scalar(1.0)
}

fn denormalize<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    images.add_scalar(1.0).div_scalar(2.0)
}

pub struct AdversarialTrainer<B: AutodiffBackend, GO, DO> {
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    perceptual: Option<Vgg19<B>>,
    optimizers: OptimizerSet<GO, DO>,
    weights: GanLossWeights,
    init_epoch: usize,
    learning_rate: f64,
    bce: BinaryCrossEntropyLoss<B>,
    mse: MseLoss,
}

impl<B: AutodiffBackend, GO, DO> AdversarialTrainer<B, GO, DO> {
    pub fn generator(&self) -> &Generator<B> {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator<B> {
        &self.discriminator
    }

    pub fn into_parts(self) -> (Generator<B>, Discriminator<B>) {
        (self.generator, self.discriminator)
    }
}

impl<B, GO, DO> AdversarialTrainer<B, GO, DO>
where
    B: AutodiffBackend,
    GO: Optimizer<Generator<B>, B>,
    DO: Optimizer<Discriminator<B>, B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generator: Generator<B>,
        discriminator: Discriminator<B>,
        perceptual: Option<Vgg19<B>>,
        optimizers: OptimizerSet<GO, DO>,
        weights: GanLossWeights,
        init_epoch: usize,
        learning_rate: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            generator,
            discriminator,
            perceptual,
            optimizers,
            weights,
            init_epoch,
            learning_rate,
            bce: BinaryCrossEntropyLossConfig::new()
                .with_logits(true)
                .init(device),
            mse: MseLoss::new(),
        }
    }

    fn validate(&self, batch: &SrBatch<B>) -> Result<(), TrainError> {
        let [b, c, h, w] = batch.lr.dims();
        let [sx, sy] = self.generator.scale();
        let channels = self.generator.channels();

        if c != channels {
            return Err(TrainError::BatchShape {
                what: "input",
                expected: vec![b, channels, h, w],
                actual: vec![b, c, h, w],
            });
        }
        let expected = [b, channels, h * sy, w * sx];
        let actual = batch.hr.dims();
        if actual != expected {
            return Err(TrainError::BatchShape {
                what: "target",
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        Ok(())
    }

    /// Runs one optimization step for `epoch` and reports its losses.
    ///
    /// The batch is checked before any module runs, so a rejected batch
    /// leaves every parameter untouched.
    pub fn train_step(
        &mut self,
        batch: &SrBatch<B>,
        epoch: usize,
    ) -> Result<BTreeMap<String, f32>, TrainError> {
        self.validate(batch)?;

        let phase = TrainingPhase::at(epoch, self.init_epoch);
        log::debug!("epoch {epoch}: {phase:?} step on {} images", batch.size());

        let lr = normalize(batch.lr.clone());
        let hr = normalize(batch.hr.clone());
        let metrics = match phase {
            TrainingPhase::Pretrain => self.pretrain_step(lr, hr),
            TrainingPhase::Adversarial => self.adversarial_step(lr, hr),
        };
        Ok(metrics)
    }

    fn pretrain_step(&mut self, lr: Tensor<B, 4>, hr: Tensor<B, 4>) -> BTreeMap<String, f32> {
        let sr = self.generator.forward(lr);
        let mse = self.mse.forward(sr, hr, Reduction::Mean);
        let value = mse.clone().into_scalar().to_f32();

        let grads = GradientsParams::from_grads(mse.backward(), &self.generator);
        self.generator =
            self.optimizers
                .reconstruction
                .step(self.learning_rate, self.generator.clone(), grads);

        BTreeMap::from([("loss".to_string(), value), ("mse".to_string(), value)])
    }

    fn adversarial_step(&mut self, lr: Tensor<B, 4>, hr: Tensor<B, 4>) -> BTreeMap<String, f32> {
        let mut metrics = BTreeMap::new();
        let device = hr.device();
        let batch_size = hr.dims()[0];
        let real = Tensor::<B, 2, Int>::ones([batch_size, 1], &device);
        let fake = Tensor::<B, 2, Int>::zeros([batch_size, 1], &device);

        let sr = self.generator.forward(lr);

        // discriminator
        let real_loss = self
            .bce
            .forward(self.discriminator.forward(hr.clone()), real.clone());
        let fake_loss = self
            .bce
            .forward(self.discriminator.forward(sr.clone().detach()), fake);
        let mut d_loss = real_loss + fake_loss;
        if let Some(penalty) = self.discriminator.regularization_loss() {
            d_loss = d_loss + penalty;
        }
        metrics.insert("d_loss".to_string(), d_loss.clone().into_scalar().to_f32());

        let grads = GradientsParams::from_grads(d_loss.backward(), &self.discriminator);
        self.discriminator = self.optimizers.discriminator.step(
            self.learning_rate,
            self.discriminator.clone(),
            grads,
        );

        // generator, against the updated discriminator
        let mse = self.mse.forward(sr.clone(), hr.clone(), Reduction::Mean);
        let g_loss = self
            .bce
            .forward(self.discriminator.forward(sr.clone()), real);
        metrics.insert("mse".to_string(), mse.clone().into_scalar().to_f32());
        metrics.insert("g_loss".to_string(), g_loss.clone().into_scalar().to_f32());

        let mut loss = mse.mul_scalar(self.weights.mse) + g_loss.mul_scalar(self.weights.gan);
        if let Some(vgg) = &self.perceptual {
            let target = vgg.forward(imagenet_norm(hr)).detach();
            let output = vgg.forward(imagenet_norm(sr));
            let perceptual = self.mse.forward(target, output, Reduction::Mean);
            metrics.insert(
                "perceptual".to_string(),
                perceptual.clone().into_scalar().to_f32(),
            );
            loss = loss + perceptual.mul_scalar(self.weights.perceptual);
        }
        if let Some(penalty) = self.generator.regularization_loss() {
            loss = loss + penalty;
        }
        metrics.insert("loss".to_string(), loss.clone().into_scalar().to_f32());

        let grads = GradientsParams::from_grads(loss.backward(), &self.generator);
        self.generator =
            self.optimizers
                .generator
                .step(self.learning_rate, self.generator.clone(), grads);

        metrics
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Training loop

/// Image quality on the `[0, 1]` range, averaged over batches.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValidationMetrics {
    /// dB
    pub psnr: f32,
    pub ssim: f32,
}

pub fn evaluate<B: Backend>(
    dataloader: Arc<dyn DataLoader<B, SrBatch<B>>>,
    generator: &Generator<B>,
) -> ValidationMetrics {
    let mut total = ValidationMetrics::default();
    let mut count = 0usize;
    for batch in dataloader.iter() {
        let sr = denormalize(generator.forward(normalize(batch.lr))).clamp(0.0, 1.0);
        total.psnr += psnr(sr.clone(), batch.hr.clone(), 1.0);
        total.ssim += ssim(sr, batch.hr, 1.0);
        count += 1;
    }

    if count == 0 {
        return total;
    }
    ValidationMetrics {
        psnr: total.psnr / count as f32,
        ssim: total.ssim / count as f32,
    }
}

pub fn save_sample<B: Backend>(
    dataloader: Arc<dyn DataLoader<B, SrBatch<B>>>,
    generator: &Generator<B>,
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let Some(batch) = dataloader.iter().next() else {
        log::warn!("validation set is empty, no sample written");
        return Ok(());
    };

    let mut rows = Vec::new();
    for i in 0..batch.size().min(3) {
        let (lr, hr) = batch.get(i);
        let sr = denormalize(generator.forward(normalize(lr.clone().unsqueeze())));
        rows.push((
            tensor_to_image(lr),
            tensor_to_image(sr.squeeze(0)),
            tensor_to_image(hr),
        ));
    }
    save_mosaic(&rows, path)?;
    Ok(())
}

pub fn train<B: AutodiffBackend>(
    config: TrainingConfig,
    train_dir: &Path,
    valid_dir: &Path,
    out_dir: &Path,
    device: &B::Device,
    resume: bool,
) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(out_dir)?;
    config.save(out_dir.join("config.json"))?;
    B::seed(config.seed);

    let scale = config.model.generator.scale;
    let dataloader_train = DataLoaderBuilder::<B, _, _>::new(SrBatcher)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(SrDataset::new(train_dir, config.patch_size, scale)?);
    let dataloader_valid = DataLoaderBuilder::<B::InnerBackend, _, _>::new(SrBatcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(SrDataset::new(valid_dir, config.patch_size, scale)?);

    let Model {
        mut generator,
        mut discriminator,
    } = config.model.init::<B>(device, config.weight_decay)?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let gen_path = out_dir.join("gen");
    let disc_path = out_dir.join("disc");
    if resume {
        if gen_path.with_extension("mpk").exists() && disc_path.with_extension("mpk").exists() {
            log::info!("resuming from {}", out_dir.display());
            let record = recorder.load::<GeneratorRecord<B>>(gen_path.clone(), device)?;
            generator = generator.load_record(record);
            let record = recorder.load::<DiscriminatorRecord<B>>(disc_path.clone(), device)?;
            discriminator = discriminator.load_record(record);
        } else {
            log::warn!("no checkpoint in {}, starting fresh", out_dir.display());
        }
    }

    let perceptual = config
        .perceptual
        .as_ref()
        .map(|perceptual| perceptual.init::<B>(device))
        .transpose()?;

    let mut trainer = AdversarialTrainer::new(
        generator,
        discriminator,
        perceptual,
        config.optimizers::<B>(),
        config.loss_weights(),
        config.init_epoch,
        config.learning_rate,
        device,
    );

    for epoch in 1..=config.epochs {
        let phase = TrainingPhase::at(epoch, config.init_epoch);
        let mut totals = BTreeMap::<String, f32>::new();
        let mut steps = 0usize;

        for batch in dataloader_train.iter() {
            for (name, value) in trainer.train_step(&batch, epoch)? {
                *totals.entry(name).or_default() += value;
            }
            steps += 1;
        }

        let summary = totals
            .iter()
            .map(|(name, total)| format!("{name}: {:+.5}", total / steps.max(1) as f32))
            .collect::<Vec<_>>()
            .join(", ");
        let generator = trainer.generator().valid();
        let valid = evaluate(dataloader_valid.clone(), &generator);
        log::info!(
            "[Epoch {epoch:3}/{:3} {phase:?}] {summary} | valid PSNR {:.2} dB, SSIM {:.4}",
            config.epochs,
            valid.psnr,
            valid.ssim,
        );

        save_sample(
            dataloader_valid.clone(),
            &generator,
            &out_dir.join(format!("epoch_{epoch:04}.png")),
        )?;
    }

    let (generator, discriminator) = trainer.into_parts();
    recorder.record(generator.into_record(), gen_path.clone())?;
    recorder.record(discriminator.into_record(), disc_path.clone())?;
    log::info!(
        "checkpoints written to {} and {}",
        gen_path.with_extension("mpk").display(),
        disc_path.with_extension("mpk").display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{discriminator::DiscriminatorConfig, generator::GeneratorConfig};
    use burn::{
        backend::{Autodiff, NdArray},
        record::BinBytesRecorder,
        tensor::Distribution,
    };
    use rstest::rstest;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn config() -> TrainingConfig {
        TrainingConfig::new()
            .with_model(
                ModelConfig::new()
                    .with_generator(
                        GeneratorConfig::new()
                            .with_filters(4)
                            .with_residual_blocks(1)
                            .with_scale([2, 2]),
                    )
                    .with_discriminator(DiscriminatorConfig::new().with_filters(4).with_layers(2)),
            )
            .with_init_epoch(2)
            .with_learning_rate(1e-2)
    }

    fn trainer(
        config: &TrainingConfig,
    ) -> AdversarialTrainer<
        TestBackend,
        impl Optimizer<Generator<TestBackend>, TestBackend>,
        impl Optimizer<Discriminator<TestBackend>, TestBackend>,
    > {
        let device = Default::default();
        let Model {
            generator,
            discriminator,
        } = config.model.init::<TestBackend>(&device, config.weight_decay).unwrap();
        let perceptual = config
            .perceptual
            .as_ref()
            .map(|p| p.init::<TestBackend>(&device).unwrap());

        AdversarialTrainer::new(
            generator,
            discriminator,
            perceptual,
            config.optimizers::<TestBackend>(),
            config.loss_weights(),
            config.init_epoch,
            config.learning_rate,
            &device,
        )
    }

    fn batch(lr_size: usize, hr_size: usize) -> SrBatch<TestBackend> {
        let device = Default::default();
        SrBatch {
            lr: Tensor::random([2, 3, lr_size, lr_size], Distribution::Default, &device),
            hr: Tensor::random([2, 3, hr_size, hr_size], Distribution::Default, &device),
        }
    }

    fn discriminator_bytes<GO, DO>(trainer: &AdversarialTrainer<TestBackend, GO, DO>) -> Vec<u8> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(trainer.discriminator().clone().into_record(), ())
            .unwrap()
    }

    fn generator_bytes<GO, DO>(trainer: &AdversarialTrainer<TestBackend, GO, DO>) -> Vec<u8> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(trainer.generator().clone().into_record(), ())
            .unwrap()
    }

    #[rstest]
    #[case(0, 100, TrainingPhase::Pretrain)]
    #[case(100, 100, TrainingPhase::Pretrain)]
    #[case(101, 100, TrainingPhase::Adversarial)]
    #[case(1, 0, TrainingPhase::Adversarial)]
    fn phase_switches_after_init_epoch(
        #[case] epoch: usize,
        #[case] init_epoch: usize,
        #[case] expected: TrainingPhase,
    ) {
        assert_eq!(TrainingPhase::at(epoch, init_epoch), expected);
    }

    #[test]
    fn pretrain_leaves_the_discriminator_untouched() {
        let config = config();
        let mut trainer = trainer(&config);
        let before_d = discriminator_bytes(&trainer);
        let before_g = generator_bytes(&trainer);

        let first = trainer.train_step(&batch(4, 8), 1).unwrap();
        let second = trainer.train_step(&batch(4, 8), 2).unwrap();

        assert_eq!(discriminator_bytes(&trainer), before_d);
        assert_ne!(generator_bytes(&trainer), before_g);
        for step in [first, second] {
            assert_eq!(step.keys().collect::<Vec<_>>(), vec!["loss", "mse"]);
            assert_eq!(step["loss"], step["mse"]);
        }
    }

    #[test]
    fn adversarial_step_updates_both_networks() {
        let config = config();
        let mut trainer = trainer(&config);
        let before_d = discriminator_bytes(&trainer);
        let before_g = generator_bytes(&trainer);

        let metrics = trainer.train_step(&batch(4, 8), 3).unwrap();

        assert_ne!(discriminator_bytes(&trainer), before_d);
        assert_ne!(generator_bytes(&trainer), before_g);
        assert_eq!(
            metrics.keys().collect::<Vec<_>>(),
            vec!["d_loss", "g_loss", "loss", "mse"]
        );
        assert!(metrics.values().all(|v| v.is_finite()));
    }

    #[test]
    fn generator_is_scored_by_the_updated_discriminator() {
        let config = config();
        let mut trainer = trainer(&config);
        let device = Default::default();
        let batch = batch(4, 8);

        let generator = trainer.generator().clone();
        let stale = trainer.discriminator().clone();
        let metrics = trainer.train_step(&batch, 3).unwrap();
        let fresh = trainer.discriminator().clone();

        let bce = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&device);
        let sr = generator.forward(normalize(batch.lr.clone()));
        let real = Tensor::<TestBackend, 2, Int>::ones([2, 1], &device);
        let score = |d: &Discriminator<TestBackend>| {
            bce.forward(d.forward(sr.clone()), real.clone())
                .into_scalar()
                .to_f32()
        };

        assert!((score(&fresh) - metrics["g_loss"]).abs() < 1e-5);
        assert!((score(&stale) - metrics["g_loss"]).abs() > 1e-5);
    }

    #[test]
    fn validation_reports_psnr_and_ssim() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png"] {
            image::RgbImage::from_fn(16, 16, |x, y| {
                image::Rgb([(x * 16) as u8, (y * 16) as u8, 64])
            })
            .save(dir.path().join(name))
            .unwrap();
        }
        let loader = DataLoaderBuilder::<NdArray<f32>, _, _>::new(SrBatcher)
            .batch_size(2)
            .build(SrDataset::new(dir.path(), 8, [2, 2]).unwrap());

        let Model { generator, .. } = config()
            .model
            .init::<NdArray<f32>>(&device, 0.0)
            .unwrap();
        let metrics = evaluate(loader, &generator);
        assert!(metrics.psnr.is_finite() && metrics.psnr > 0.0);
        assert!(metrics.ssim <= 1.0 && metrics.ssim > -1.0);
    }

    #[test]
    fn perceptual_term_is_reported_when_enabled() {
        let config = config().with_perceptual(Some(
            PerceptualConfig::new().with_layer("block1_conv2".to_string()),
        ));
        let mut trainer = trainer(&config);

        let metrics = trainer.train_step(&batch(4, 8), 3).unwrap();
        assert!(metrics.contains_key("perceptual"));
        assert!(metrics["perceptual"] >= 0.0);
    }

    #[test]
    fn composite_loss_includes_regularization() {
        let config = config().with_weight_decay(1e-2);
        let mut trainer = trainer(&config);

        let metrics = trainer.train_step(&batch(4, 8), 3).unwrap();
        let unregularized = config.mse_weight as f32 * metrics["mse"]
            + config.gan_weight as f32 * metrics["g_loss"];
        assert!(metrics["loss"] > unregularized);
    }

    #[rstest]
    #[case(4, 6, 1)]
    #[case(4, 8, 3)]
    fn bad_batches_are_rejected_before_any_step(
        #[case] lr_size: usize,
        #[case] hr_size: usize,
        #[case] epoch: usize,
    ) {
        let config = config();
        let mut trainer = trainer(&config);
        let before_d = discriminator_bytes(&trainer);
        let before_g = generator_bytes(&trainer);

        let mut bad = batch(lr_size, hr_size);
        if hr_size == lr_size * 2 {
            // right scale, wrong channel count
            bad.lr = Tensor::random(
                [2, 1, lr_size, lr_size],
                Distribution::Default,
                &Default::default(),
            );
        }

        let result = trainer.train_step(&bad, epoch);
        assert!(matches!(result, Err(TrainError::BatchShape { .. })));
        assert_eq!(discriminator_bytes(&trainer), before_d);
        assert_eq!(generator_bytes(&trainer), before_g);
    }

    #[test]
    fn config_defaults_follow_srgan() {
        let config = TrainingConfig::new();
        assert_eq!(config.init_epoch, 100);
        assert_eq!(
            config.loss_weights(),
            GanLossWeights {
                mse: 1.0,
                gan: 1e-3,
                perceptual: 0.0,
            }
        );
        assert_eq!(config.model.generator.residual_blocks, 16);
        assert!(config.perceptual.is_none());
    }
}
