//! Configuration format for the compositing pipeline and the discriminators.

use crate::{common::*, model::NormSpec, params};

pub use dataset::*;
pub use discriminator::*;
pub use generate::*;
pub use illumination::*;
pub use transform::*;

/// The root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(
        serialize_with = "serialize_device",
        deserialize_with = "deserialize_device",
        default = "default_device"
    )]
    pub device: Device,
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub illumination: IlluminationConfig,
    pub discriminator: DiscriminatorConfig,
    pub generate: Option<GenerateConfig>,
}

impl Config {
    /// Loads a json5 config file, or a YAML file if the extension says so.
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: Self = if is_yaml {
            serde_yaml::from_str(&text)?
        } else {
            json5::from_str(&text)?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.transform.validate()?;
        self.illumination.validate()?;
        self.discriminator.validate()?;
        self.dataset.validate()?;
        Ok(())
    }
}

mod dataset {
    use super::*;

    /// Where the shadow-free images and mattes live and how they are paired.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        /// The root directory containing `shadow_free/` and `matte/`.
        pub dataset_dir: PathBuf,
        #[serde(default)]
        pub seed: u64,
        #[serde(default)]
        pub mask_preprocess_mode: MaskPreprocessMode,
        #[serde(default)]
        pub mask_sampling: MaskSampling,
        /// If set, a thresholded mask is also produced for the generator.
        #[serde(default)]
        pub mask_to_g: Option<MaskToG>,
        #[serde(default = "default_mask_blur_sigma")]
        pub mask_blur_sigma: f32,
        #[serde(default = "default_extensions")]
        pub extensions: Vec<String>,
    }

    impl DatasetConfig {
        pub fn validate(&self) -> Result<()> {
            ensure!(
                self.mask_blur_sigma >= 0.0,
                "mask_blur_sigma must be non-negative"
            );
            ensure!(
                !self.extensions.is_empty(),
                "at least one image extension is required"
            );
            Ok(())
        }
    }

    /// How the mask transform relates to the target transform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum MaskPreprocessMode {
        /// The mask gets its own scale-to-width transform.
        #[serde(rename = "scale_width")]
        ScaleWidth,
        /// The mask reuses the target transform parameters verbatim.
        #[serde(rename = "dhan")]
        Dhan,
    }

    impl Default for MaskPreprocessMode {
        fn default() -> Self {
            Self::ScaleWidth
        }
    }

    /// How a mask is picked from the mask pool.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum MaskSampling {
        /// A shared cursor cycling over the pool.
        #[serde(rename = "cyclic")]
        Cyclic,
        /// `index mod len`, independent of call order.
        #[serde(rename = "indexed")]
        Indexed,
    }

    impl Default for MaskSampling {
        fn default() -> Self {
            Self::Cyclic
        }
    }

    /// The kind of mask fed to the generator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum MaskToG {
        #[serde(rename = "gt")]
        Gt,
    }

    fn default_mask_blur_sigma() -> f32 {
        params::MASK_BLUR_SIGMA
    }

    fn default_extensions() -> Vec<String> {
        ["png", "jpg", "jpeg", "bmp", "tif", "tiff"]
            .iter()
            .map(|ext| ext.to_string())
            .collect()
    }
}

mod transform {
    use super::*;

    /// The geometric preprocessing applied to every image.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TransformConfig {
        #[serde(default)]
        pub preprocess_mode: PreprocessMode,
        #[serde(default = "default_load_size")]
        pub load_size: usize,
        #[serde(default = "default_crop_size")]
        pub crop_size: usize,
        /// Enables random horizontal flipping.
        #[serde(default = "default_true")]
        pub flip: bool,
        /// Maps RGB images to [-1, 1]. Masks always stay in [0, 1].
        #[serde(default = "default_true")]
        pub normalize: bool,
    }

    impl TransformConfig {
        pub fn validate(&self) -> Result<()> {
            ensure!(self.load_size > 0, "load_size must be positive");
            ensure!(self.crop_size > 0, "crop_size must be positive");
            if self.preprocess_mode.resizes() && self.preprocess_mode.crops() {
                ensure!(
                    self.crop_size <= self.load_size,
                    "crop_size ({}) must not exceed load_size ({})",
                    self.crop_size,
                    self.load_size
                );
            }
            Ok(())
        }
    }

    impl Default for TransformConfig {
        fn default() -> Self {
            Self {
                preprocess_mode: PreprocessMode::default(),
                load_size: params::LOAD_SIZE,
                crop_size: params::CROP_SIZE,
                flip: true,
                normalize: true,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum PreprocessMode {
        #[serde(rename = "resize_and_crop")]
        ResizeAndCrop,
        #[serde(rename = "crop")]
        Crop,
        #[serde(rename = "scale_width")]
        ScaleWidth,
        #[serde(rename = "scale_width_and_crop")]
        ScaleWidthAndCrop,
        #[serde(rename = "scale_shortside")]
        ScaleShortside,
        #[serde(rename = "scale_shortside_and_crop")]
        ScaleShortsideAndCrop,
        #[serde(rename = "none")]
        None,
    }

    impl PreprocessMode {
        pub fn resizes(&self) -> bool {
            !matches!(self, Self::Crop | Self::None)
        }

        pub fn crops(&self) -> bool {
            matches!(
                self,
                Self::ResizeAndCrop
                    | Self::Crop
                    | Self::ScaleWidthAndCrop
                    | Self::ScaleShortsideAndCrop
            )
        }
    }

    impl Default for PreprocessMode {
        fn default() -> Self {
            Self::ResizeAndCrop
        }
    }

    fn default_load_size() -> usize {
        params::LOAD_SIZE
    }

    fn default_crop_size() -> usize {
        params::CROP_SIZE
    }
}

mod illumination {
    use super::*;

    /// Parameter ranges of the shadow darkening curve.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct IlluminationConfig {
        pub xmin_at_y_0: f64,
        pub xmax_at_y_0: f64,
        pub ymin_at_x_255: f64,
        pub ymax_at_x_255: f64,
        pub x_turb_mu: f64,
        pub x_turb_sigma: f64,
        pub slope_max: f64,
        pub gamma_min: f64,
        pub gamma_max: f64,
        pub intercepts_mode: InterceptsMode,
    }

    impl IlluminationConfig {
        pub fn validate(&self) -> Result<()> {
            let Self {
                xmin_at_y_0,
                xmax_at_y_0,
                ymin_at_x_255,
                ymax_at_x_255,
                x_turb_sigma,
                slope_max,
                gamma_min,
                gamma_max,
                ..
            } = *self;

            ensure!(
                (0.0..1.0).contains(&xmin_at_y_0) && (0.0..1.0).contains(&xmax_at_y_0),
                "xmin_at_y_0 and xmax_at_y_0 must lie in [0, 1)"
            );
            ensure!(
                xmin_at_y_0 <= xmax_at_y_0,
                "xmin_at_y_0 must not exceed xmax_at_y_0"
            );
            ensure!(
                (0.0..=1.0).contains(&ymin_at_x_255) && (0.0..=1.0).contains(&ymax_at_x_255),
                "ymin_at_x_255 and ymax_at_x_255 must lie in [0, 1]"
            );
            ensure!(
                ymin_at_x_255 <= ymax_at_x_255,
                "ymin_at_x_255 must not exceed ymax_at_x_255"
            );
            ensure!(slope_max > 0.0, "slope_max must be positive");
            ensure!(x_turb_sigma >= 0.0, "x_turb_sigma must be non-negative");
            ensure!(gamma_min >= 1.0, "gamma_min must be at least 1");
            ensure!(gamma_min <= gamma_max, "gamma_min must not exceed gamma_max");
            Ok(())
        }
    }

    impl Default for IlluminationConfig {
        fn default() -> Self {
            Self {
                xmin_at_y_0: params::XMIN_AT_Y_0,
                xmax_at_y_0: params::XMAX_AT_Y_0,
                ymin_at_x_255: params::YMIN_AT_X_255,
                ymax_at_x_255: params::YMAX_AT_X_255,
                x_turb_mu: params::X_TURB_MU,
                x_turb_sigma: params::X_TURB_SIGMA,
                slope_max: params::SLOPE_MAX,
                gamma_min: params::GAMMA_MIN,
                gamma_max: params::GAMMA_MAX,
                intercepts_mode: InterceptsMode::default(),
            }
        }
    }

    /// Strategy used to draw the darkening curve.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum InterceptsMode {
        #[serde(rename = "affine")]
        Affine,
        #[serde(rename = "affine_unsync")]
        AffineUnsync,
        #[serde(rename = "random_jitter")]
        RandomJitter,
        #[serde(rename = "gamma_correction")]
        GammaCorrection,
    }

    impl Default for InterceptsMode {
        fn default() -> Self {
            Self::Affine
        }
    }
}

mod discriminator {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct DiscriminatorConfig {
        pub kind: DiscriminatorKind,
        pub model: ModelFamily,
        pub input_nc: i64,
        pub output_nc: i64,
        #[serde(default = "default_ndf")]
        pub ndf: i64,
        #[serde(default)]
        pub norm_d: NormSpec,
        #[serde(default)]
        pub use_precomp_mask_to_d: bool,
        /// Returns every layer activation for feature matching.
        #[serde(default = "default_true")]
        pub get_intermediate_features: bool,
    }

    impl DiscriminatorConfig {
        pub fn validate(&self) -> Result<()> {
            ensure!(self.input_nc > 0, "input_nc must be positive");
            ensure!(self.output_nc > 0, "output_nc must be positive");
            ensure!(self.ndf > 0, "ndf must be positive");

            match self.kind {
                DiscriminatorKind::Multiscale {
                    num_d, n_layers_d, ..
                } => {
                    ensure!(num_d > 0, "num_D must be positive");
                    ensure!(n_layers_d > 0, "n_layers_D must be positive");
                }
                DiscriminatorKind::Global { input_size } => {
                    ensure!(input_size > 0, "input_size must be positive");
                }
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum DiscriminatorKind {
        #[serde(rename = "multiscale")]
        Multiscale {
            #[serde(default)]
            subarch: Subarch,
            #[serde(default = "default_num_d")]
            num_d: usize,
            #[serde(default = "default_n_layers_d")]
            n_layers_d: usize,
        },
        #[serde(rename = "global")]
        Global { input_size: usize },
    }

    /// Architecture of each discriminator inside the multiscale ensemble.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum Subarch {
        #[serde(rename = "n_layer")]
        NLayer,
    }

    impl Default for Subarch {
        fn default() -> Self {
            Self::NLayer
        }
    }

    /// The translation model the discriminator is trained with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum ModelFamily {
        #[serde(rename = "pix2pix")]
        Pix2Pix,
        #[serde(rename = "dhan")]
        Dhan,
        #[serde(rename = "argan")]
        Argan,
        #[serde(rename = "our")]
        Our,
    }

    fn default_ndf() -> i64 {
        params::NDF
    }

    fn default_num_d() -> usize {
        params::NUM_D
    }

    fn default_n_layers_d() -> usize {
        params::N_LAYERS_D
    }
}

mod generate {
    use super::*;

    /// Options of the composite rendering program.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct GenerateConfig {
        pub output_dir: PathBuf,
        pub num_samples: usize,
        pub num_workers: Option<NonZeroUsize>,
    }
}

fn default_true() -> bool {
    true
}

fn default_device() -> Device {
    Device::cuda_if_available()
}

fn serialize_device<S>(device: &Device, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = match device {
        Device::Cpu => "cpu".into(),
        Device::Cuda(n) => format!("cuda({})", n),
    };
    text.serialize(serializer)
}

fn deserialize_device<'de, D>(deserializer: D) -> Result<Device, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    parse_device(&name).map_err(|err| D::Error::custom(format!("{}", err)))
}

pub fn parse_device(name: &str) -> Result<Device> {
    let device = match name {
        "cpu" => Device::Cpu,
        _ => {
            let prefix = "cuda(";
            let suffix = ")";
            ensure!(
                name.starts_with(prefix) && name.ends_with(suffix),
                "invalid device name {}",
                name
            );
            let number: usize = name[(prefix.len())..(name.len() - suffix.len())]
                .parse()
                .map_err(|_err| format_err!("invalid device name {}", name))?;
            Device::Cuda(number)
        }
    };
    Ok(device)
}
