use super::{folder::DatasetPaths, sampler::CyclicSampler};
use crate::{
    common::*,
    composite::composite,
    config::{
        Config, DatasetConfig, IlluminationConfig, MaskPreprocessMode, MaskSampling, MaskToG,
        PreprocessMode, TransformConfig,
    },
    illumination::{IlluminationModel, IntensityRange},
    params,
    transform::{ImageKind, Transform, TransformParams},
    utils,
};

/// A user hook run on every sample before it is returned.
pub type PostProcess = Box<dyn Fn(TrainingSample) -> Result<TrainingSample> + Send + Sync>;

/// One synthetic training pair.
#[derive(Debug, TensorLike)]
pub struct TrainingSample {
    /// The synthetically shadowed composite.
    pub input: Tensor,
    /// The shadow-free ground truth.
    pub target: Tensor,
    /// The soft shadow mask in [0, 1].
    pub mask: Tensor,
    /// The thresholded mask fed to the generator, if enabled.
    pub precomp_mask: Option<Tensor>,
    #[tensor_like(clone)]
    pub path: PathBuf,
    #[tensor_like(clone)]
    pub mask_path: PathBuf,
}

/// Samples stacked along a new batch dimension.
#[derive(Debug, TensorLike)]
pub struct SampleBatch {
    pub input: Tensor,
    pub target: Tensor,
    pub mask: Tensor,
    pub precomp_mask: Option<Tensor>,
}

impl SampleBatch {
    pub fn collate(samples: &[TrainingSample]) -> Result<Self> {
        ensure!(!samples.is_empty(), "cannot collate an empty batch");

        let stack = |select: fn(&TrainingSample) -> &Tensor| {
            let tensors = samples.iter().map(select).collect_vec();
            Tensor::stack(&tensors, 0)
        };

        let precomp_mask = if samples.iter().all(|sample| sample.precomp_mask.is_some()) {
            let masks = samples
                .iter()
                .filter_map(|sample| sample.precomp_mask.as_ref())
                .collect_vec();
            Some(Tensor::stack(&masks, 0))
        } else {
            ensure!(
                samples.iter().all(|sample| sample.precomp_mask.is_none()),
                "either all or none of the samples must carry precomp_mask"
            );
            None
        };

        Ok(Self {
            input: stack(|sample| &sample.input),
            target: stack(|sample| &sample.target),
            mask: stack(|sample| &sample.mask),
            precomp_mask,
        })
    }
}

/// The tensors composed from one target image and one mask image.
#[derive(Debug)]
pub struct ComposedPair {
    pub input: Tensor,
    pub target: Tensor,
    pub mask: Tensor,
    pub precomp_mask: Option<Tensor>,
}

/// Composites shadow-free images with randomly drawn mattes.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SynthDataset {
    seed: u64,
    transform: TransformConfig,
    mask_preprocess_mode: MaskPreprocessMode,
    mask_sampling: MaskSampling,
    mask_to_g: Option<MaskToG>,
    mask_blur_sigma: f32,
    illumination: IlluminationModel,
    paths: DatasetPaths,
    mask_sampler: CyclicSampler,
    #[derivative(Debug = "ignore")]
    postprocess: Option<PostProcess>,
}

impl SynthDataset {
    /// Scans the dataset directory and builds the dataset.
    pub fn open(config: &Config) -> Result<Self> {
        let paths = DatasetPaths::scan(&config.dataset.dataset_dir, &config.dataset.extensions)?;
        info!(
            "found {} shadow-free images and {} mattes in {}",
            paths.target.len(),
            paths.mask.len(),
            config.dataset.dataset_dir.display()
        );
        Self::new(
            &config.dataset,
            &config.transform,
            &config.illumination,
            paths,
        )
    }

    pub fn new(
        dataset: &DatasetConfig,
        transform: &TransformConfig,
        illumination: &IlluminationConfig,
        paths: DatasetPaths,
    ) -> Result<Self> {
        dataset.validate()?;
        transform.validate()?;
        let illumination = IlluminationModel::new(illumination.clone())?;
        let mask_sampler = CyclicSampler::new(paths.mask.len())?;

        Ok(Self {
            seed: dataset.seed,
            transform: transform.clone(),
            mask_preprocess_mode: dataset.mask_preprocess_mode,
            mask_sampling: dataset.mask_sampling,
            mask_to_g: dataset.mask_to_g,
            mask_blur_sigma: dataset.mask_blur_sigma,
            illumination,
            paths,
            mask_sampler,
            postprocess: None,
        })
    }

    pub fn with_postprocess<F>(mut self, postprocess: F) -> Self
    where
        F: 'static + Fn(TrainingSample) -> Result<TrainingSample> + Send + Sync,
    {
        self.postprocess = Some(Box::new(postprocess));
        self
    }

    /// The number of shadow-free images.
    pub fn len(&self) -> usize {
        self.paths.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.target.is_empty()
    }

    pub fn paths(&self) -> &DatasetPaths {
        &self.paths
    }

    /// The random source of the `draw`-th sample.
    pub fn rng_for(&self, draw: usize) -> StdRng {
        let mixed = (draw as u64)
            .wrapping_add(1)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15);
        StdRng::seed_from_u64(self.seed ^ mixed)
    }

    fn next_mask_index(&self, draw: usize) -> usize {
        match self.mask_sampling {
            MaskSampling::Cyclic => self.mask_sampler.next_index(),
            MaskSampling::Indexed => self.mask_sampler.index_at(draw),
        }
    }

    /// Loads the target at `index`, draws a mask and composes a training sample.
    pub fn sample(&self, index: usize) -> Result<TrainingSample> {
        self.sample_at(index, index)
    }

    /// Composes the target at `index` with the random draws keyed by `draw`.
    ///
    /// Passes over the same target image with distinct `draw` keys yield
    /// distinct pairs.
    pub fn sample_at(&self, index: usize, draw: usize) -> Result<TrainingSample> {
        ensure!(
            index < self.len(),
            "index {} is out of range for a dataset of {} images",
            index,
            self.len()
        );

        let target_path = &self.paths.target[index];
        let mask_path = &self.paths.mask[self.next_mask_index(draw)];

        let target_image = utils::open_rgb(target_path)?;
        let mask_image = utils::open_gray(mask_path)?;

        let mut rng = self.rng_for(draw);
        let ComposedPair {
            input,
            target,
            mask,
            precomp_mask,
        } = self
            .compose(&target_image, &mask_image, &mut rng)
            .with_context(|| format!("failed to compose {}", target_path.display()))?;

        debug!(
            "composed {} with mask {}",
            target_path.display(),
            mask_path.display()
        );

        let sample = TrainingSample {
            input,
            target,
            mask,
            precomp_mask,
            path: target_path.clone(),
            mask_path: mask_path.clone(),
        };

        match &self.postprocess {
            Some(postprocess) => postprocess(sample),
            None => Ok(sample),
        }
    }

    /// The transform configuration applied to mattes.
    ///
    /// Under `ScaleWidth` the mask is scaled to the load width on its own and
    /// cropped only if the target is cropped.
    pub fn mask_transform_config(&self) -> TransformConfig {
        match self.mask_preprocess_mode {
            MaskPreprocessMode::ScaleWidth => {
                let preprocess_mode = if self.transform.preprocess_mode.crops() {
                    PreprocessMode::ScaleWidthAndCrop
                } else {
                    PreprocessMode::ScaleWidth
                };
                TransformConfig {
                    preprocess_mode,
                    ..self.transform.clone()
                }
            }
            MaskPreprocessMode::Dhan => self.transform.clone(),
        }
    }

    /// Draws the target transform and the matched mask transform.
    pub fn draw_transform_params<R>(
        &self,
        mask_config: &TransformConfig,
        target_size: (u32, u32),
        mask_size: (u32, u32),
        rng: &mut R,
    ) -> (TransformParams, TransformParams)
    where
        R: Rng,
    {
        let target_params = TransformParams::sample(&self.transform, target_size, rng);
        let mask_params = match self.mask_preprocess_mode {
            MaskPreprocessMode::ScaleWidth => TransformParams::sample(mask_config, mask_size, rng),
            MaskPreprocessMode::Dhan => target_params,
        };
        (target_params, mask_params)
    }

    /// Composes a shadowed input from in-memory images.
    pub fn compose<R>(
        &self,
        target_image: &DynamicImage,
        mask_image: &DynamicImage,
        rng: &mut R,
    ) -> Result<ComposedPair>
    where
        R: Rng,
    {
        let mask_image = if self.mask_blur_sigma > 0.0 {
            mask_image.blur(self.mask_blur_sigma)
        } else {
            mask_image.clone()
        };

        let mask_config = self.mask_transform_config();
        let (target_params, mask_params) = self.draw_transform_params(
            &mask_config,
            target_image.dimensions(),
            mask_image.dimensions(),
            rng,
        );
        let target_transform = Transform::new(&self.transform, &target_params, ImageKind::Rgb);
        let mask_transform = Transform::new(&mask_config, &mask_params, ImageKind::Gray);

        let target_image = target_transform.apply_image(target_image);
        let mask_image = {
            let mask_image = mask_transform.apply_image(&mask_image);
            let (width, height) = target_image.dimensions();
            if mask_image.dimensions() != (width, height) {
                mask_image.resize_exact(width, height, FilterType::Triangle)
            } else {
                mask_image
            }
        };

        let target = target_transform.to_tensor(&target_image);
        let mask = mask_transform.to_tensor(&mask_image);

        let range = if target_transform.normalizes() {
            IntensityRange::Symmetric
        } else {
            IntensityRange::Unit
        };
        let darkened = self.illumination.darken(&target, range, rng)?;
        let input = composite(&target, &mask, &darkened)?;

        let precomp_mask = self.mask_to_g.map(|mask_to_g| match mask_to_g {
            // annotated masks are noisy, so the cutoff is randomized
            MaskToG::Gt => threshold_mask(&mask, sample_threshold(rng)),
        });

        Ok(ComposedPair {
            input,
            target,
            mask,
            precomp_mask,
        })
    }
}

/// Draws the binarization cutoff of a precomputed mask.
pub fn sample_threshold<R>(rng: &mut R) -> f64
where
    R: Rng,
{
    rng.gen_range(params::PRECOMP_MASK_THRESH_MIN..=params::PRECOMP_MASK_THRESH_MAX)
}

/// Binarizes a soft mask into a float tensor of zeros and ones.
pub fn threshold_mask(mask: &Tensor, thresh: f64) -> Tensor {
    mask.gt(thresh).to_kind(Kind::Float)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempDataset {
        root: PathBuf,
    }

    impl TempDataset {
        /// Writes `num_targets` gradients and `num_masks` square mattes.
        fn new(name: &str, num_targets: usize, num_masks: usize) -> Result<Self> {
            let root = std::env::temp_dir().join(format!(
                "synshadow-synth-{}-{}",
                name,
                std::process::id()
            ));
            let _ = fs::remove_dir_all(&root);
            let target_dir = root.join("shadow_free");
            let mask_dir = root.join("matte");
            fs::create_dir_all(&target_dir)?;
            fs::create_dir_all(&mask_dir)?;

            for index in 0..num_targets {
                let image = RgbImage::from_fn(80, 60, |x, y| {
                    Rgb([(x * 3) as u8, (y * 4) as u8, (50 + index * 20) as u8])
                });
                image.save(target_dir.join(format!("target_{:02}.png", index)))?;
            }

            for index in 0..num_masks {
                let offset = 8 + index as u32 * 4;
                let image = GrayImage::from_fn(72, 72, |x, y| {
                    let inside = (offset..offset + 32).contains(&x) && (16..48).contains(&y);
                    Luma([if inside { 255 } else { 0 }])
                });
                image.save(mask_dir.join(format!("mask_{:02}.png", index)))?;
            }

            Ok(Self { root })
        }

        fn dataset_config(&self) -> DatasetConfig {
            DatasetConfig {
                dataset_dir: self.root.clone(),
                seed: 11,
                mask_preprocess_mode: MaskPreprocessMode::Dhan,
                mask_sampling: MaskSampling::Cyclic,
                mask_to_g: None,
                mask_blur_sigma: 1.0,
                extensions: vec!["png".into()],
            }
        }

        fn build(&self, dataset: DatasetConfig) -> Result<SynthDataset> {
            let transform = TransformConfig {
                preprocess_mode: PreprocessMode::ResizeAndCrop,
                load_size: 72,
                crop_size: 64,
                flip: true,
                normalize: true,
            };
            let paths = DatasetPaths::scan(&self.root, &dataset.extensions)?;
            SynthDataset::new(&dataset, &transform, &IlluminationConfig::default(), paths)
        }
    }

    impl Drop for TempDataset {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    fn max_diff(lhs: &Tensor, rhs: &Tensor) -> f64 {
        (lhs - rhs).abs().max().double_value(&[])
    }

    #[test]
    fn sample_invariants() -> Result<()> {
        let temp = TempDataset::new("invariants", 3, 2)?;
        let dataset = temp.build(temp.dataset_config())?;
        assert_eq!(dataset.len(), 3);

        for index in 0..dataset.len() {
            let sample = dataset.sample(index)?;
            assert_eq!(sample.input.size(), [3, 64, 64]);
            assert_eq!(sample.target.size(), [3, 64, 64]);
            assert_eq!(sample.mask.size(), [1, 64, 64]);
            assert!(sample.precomp_mask.is_none());
            assert_eq!(sample.path, dataset.paths().target[index]);

            assert!(sample.mask.min().double_value(&[]) >= 0.0);
            assert!(sample.mask.max().double_value(&[]) <= 1.0);
            assert!(sample.mask.max().double_value(&[]) > 0.5);

            // shadows only darken, and unmasked pixels are untouched
            assert!((&sample.input - &sample.target).max().double_value(&[]) <= 0.0);
            let unmasked = sample.mask.eq(0.0).to_kind(Kind::Float);
            let leaked = ((&sample.input - &sample.target).abs() * unmasked)
                .max()
                .double_value(&[]);
            assert_eq!(leaked, 0.0);
        }

        Ok(())
    }

    #[test]
    fn masks_cycle_independently_of_targets() -> Result<()> {
        let temp = TempDataset::new("cycle", 5, 2)?;
        let dataset = temp.build(temp.dataset_config())?;
        assert_eq!(dataset.len(), 5);

        let mask_paths = (0..dataset.len())
            .map(|index| Ok(dataset.sample(index)?.mask_path))
            .collect::<Result<Vec<_>>>()?;
        let pool = &dataset.paths().mask;
        assert_eq!(
            mask_paths,
            vec![
                pool[0].clone(),
                pool[1].clone(),
                pool[0].clone(),
                pool[1].clone(),
                pool[0].clone()
            ]
        );
        Ok(())
    }

    #[test]
    fn samples_are_reproducible() -> Result<()> {
        let temp = TempDataset::new("reproducible", 2, 3)?;
        let config = DatasetConfig {
            mask_sampling: MaskSampling::Indexed,
            ..temp.dataset_config()
        };
        let lhs = temp.build(config.clone())?.sample(1)?;
        let rhs = temp.build(config)?.sample(1)?;

        assert_eq!(lhs.mask_path, rhs.mask_path);
        assert_eq!(max_diff(&lhs.input, &rhs.input), 0.0);
        assert_eq!(max_diff(&lhs.mask, &rhs.mask), 0.0);
        Ok(())
    }

    #[test]
    fn repeated_passes_draw_new_pairs() -> Result<()> {
        let temp = TempDataset::new("passes", 2, 5)?;
        let dataset = temp.build(DatasetConfig {
            mask_sampling: MaskSampling::Indexed,
            ..temp.dataset_config()
        })?;

        // the second pass over target 0 picks another mask and other draws
        let first = dataset.sample_at(0, 0)?;
        let second = dataset.sample_at(0, 2)?;
        assert_eq!(first.path, second.path);
        assert_ne!(first.mask_path, second.mask_path);
        assert!(max_diff(&first.input, &second.input) > 0.0);

        let again = dataset.sample_at(0, 2)?;
        assert_eq!(again.mask_path, second.mask_path);
        assert_eq!(max_diff(&again.input, &second.input), 0.0);

        // with a single mask only the random draws can differ
        let temp = TempDataset::new("passes-single", 2, 1)?;
        let dataset = temp.build(DatasetConfig {
            mask_sampling: MaskSampling::Indexed,
            ..temp.dataset_config()
        })?;
        let first = dataset.sample_at(1, 1)?;
        let second = dataset.sample_at(1, 3)?;
        assert_eq!(first.mask_path, second.mask_path);
        assert!(max_diff(&first.input, &second.input) > 0.0);
        Ok(())
    }

    #[test]
    fn dhan_mode_shares_transform_params() -> Result<()> {
        let temp = TempDataset::new("dhan", 1, 1)?;
        let dataset = temp.build(temp.dataset_config())?;
        let mut rng = StdRng::seed_from_u64(0);
        let mask_config = dataset.mask_transform_config();
        assert_eq!(mask_config.preprocess_mode, PreprocessMode::ResizeAndCrop);

        for _ in 0..20 {
            let (target, mask) =
                dataset.draw_transform_params(&mask_config, (80, 60), (200, 100), &mut rng);
            assert_eq!(target, mask);
        }

        let scale_width = temp.build(DatasetConfig {
            mask_preprocess_mode: MaskPreprocessMode::ScaleWidth,
            ..temp.dataset_config()
        })?;
        let mask_config = scale_width.mask_transform_config();
        assert_eq!(
            mask_config.preprocess_mode,
            PreprocessMode::ScaleWidthAndCrop
        );
        let differs = (0..20).any(|_| {
            let (target, mask) =
                scale_width.draw_transform_params(&mask_config, (80, 60), (200, 100), &mut rng);
            target != mask
        });
        assert!(differs);

        // the mask is aligned to the target size even under its own transform
        let sample = scale_width.sample(0)?;
        assert_eq!(sample.mask.size()[1..], sample.target.size()[1..]);
        Ok(())
    }

    #[test]
    fn precomp_mask_is_binary_subset() -> Result<()> {
        let temp = TempDataset::new("precomp", 2, 2)?;
        let dataset = temp.build(DatasetConfig {
            mask_to_g: Some(MaskToG::Gt),
            mask_blur_sigma: 5.0,
            ..temp.dataset_config()
        })?;

        let sample = dataset.sample(0)?;
        let precomp = sample.precomp_mask.as_ref().unwrap();
        assert_eq!(precomp.size(), sample.mask.size());

        let is_binary = precomp.eq(0.0).logical_or(&precomp.eq(1.0));
        assert_eq!(is_binary.to_kind(Kind::Int64).min().int64_value(&[]), 1);

        // any threshold lies in [0.1, 0.9], so the result is bounded by the extremes
        let loosest = threshold_mask(&sample.mask, 0.1);
        let tightest = threshold_mask(&sample.mask, 0.9);
        assert!((precomp - &loosest).max().double_value(&[]) <= 0.0);
        assert!((&tightest - precomp).max().double_value(&[]) <= 0.0);
        Ok(())
    }

    #[test]
    fn threshold_monotonic() {
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..1000 {
            let thresh = sample_threshold(&mut rng);
            assert!((0.1..=0.9).contains(&thresh));
        }

        let mask = Tensor::arange(101, (Kind::Float, Device::Cpu)).view([1, 1, 101]) / 100.0;
        let fractions = (1..=9)
            .map(|step| {
                threshold_mask(&mask, step as f64 / 10.0)
                    .mean(Kind::Float)
                    .double_value(&[])
            })
            .collect_vec();
        assert!(fractions.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn collate_and_postprocess() -> Result<()> {
        let temp = TempDataset::new("collate", 3, 1)?;
        let dataset = temp
            .build(DatasetConfig {
                mask_to_g: Some(MaskToG::Gt),
                ..temp.dataset_config()
            })?
            .with_postprocess(|mut sample| {
                sample.mask = sample.mask.clamp(0.0, 0.5);
                Ok(sample)
            });

        let samples = (0..3)
            .map(|index| dataset.sample(index))
            .collect::<Result<Vec<_>>>()?;
        assert!(samples
            .iter()
            .all(|sample| sample.mask.max().double_value(&[]) <= 0.5));

        let moved = samples[1].to_device(Device::Cpu);
        assert_eq!(moved.path, samples[1].path);
        assert_eq!(moved.mask_path, samples[1].mask_path);
        assert_eq!(max_diff(&moved.input, &samples[1].input), 0.0);
        assert!(moved.precomp_mask.is_some());

        let batch = SampleBatch::collate(&samples)?.to_device(Device::Cpu);
        assert_eq!(batch.input.size(), [3, 3, 64, 64]);
        assert_eq!(batch.mask.size(), [3, 1, 64, 64]);
        assert_eq!(batch.precomp_mask.unwrap().size(), [3, 1, 64, 64]);
        assert!(SampleBatch::collate(&[]).is_err());
        Ok(())
    }

    #[test]
    fn sample_failures_propagate() -> Result<()> {
        let temp = TempDataset::new("failures", 1, 1)?;
        let dataset = temp.build(temp.dataset_config())?;
        assert!(dataset.sample(1).is_err());

        fs::write(&dataset.paths().target[0], b"not an image")?;
        let err = dataset.sample(0).unwrap_err();
        assert!(format!("{:#}", err).contains("target_00.png"));
        Ok(())
    }
}
