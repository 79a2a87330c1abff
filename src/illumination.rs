//! The parametric shadow darkening model.

use crate::{
    common::*,
    config::{IlluminationConfig, InterceptsMode},
};
use rv::{dist::Gaussian, traits::Rv};

const LOG_EPS: f64 = 1e-12;

/// The value range of image tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntensityRange {
    /// Values in [0, 1].
    Unit,
    /// Values in [-1, 1].
    Symmetric,
}

impl IntensityRange {
    pub fn to_unit(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::Unit => xs.shallow_clone(),
            Self::Symmetric => (xs + 1.0) * 0.5,
        }
    }

    /// The value of black.
    pub fn lower(&self) -> f64 {
        match self {
            Self::Unit => 0.0,
            Self::Symmetric => -1.0,
        }
    }

    pub fn from_unit(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::Unit => xs.shallow_clone(),
            Self::Symmetric => xs * 2.0 - 1.0,
        }
    }
}

/// The darkening curve drawn for one image.
#[derive(Debug, Clone, PartialEq)]
pub enum DarkeningCurve {
    /// `y = slope * (x - x_intercept)` per channel.
    Affine {
        x_intercepts: Vec<f64>,
        slopes: Vec<f64>,
    },
    /// `y = x ^ gamma`.
    Gamma { gamma: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Turbulence {
    pub mu: f64,
    pub sigma: f64,
}

/// Random parameters shared by all pixels of an image.
#[derive(Debug, Clone, PartialEq)]
pub struct IlluminationParams {
    pub curve: DarkeningCurve,
    pub turbulence: Option<Turbulence>,
}

#[derive(Debug, Clone)]
pub struct IlluminationModel {
    config: IlluminationConfig,
}

impl IlluminationModel {
    pub fn new(config: IlluminationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IlluminationConfig {
        &self.config
    }

    pub fn sample_params<R>(&self, channels: usize, rng: &mut R) -> IlluminationParams
    where
        R: Rng,
    {
        let IlluminationConfig {
            x_turb_mu,
            x_turb_sigma,
            gamma_min,
            gamma_max,
            intercepts_mode,
            ..
        } = self.config;

        let curve = match intercepts_mode {
            InterceptsMode::Affine | InterceptsMode::RandomJitter => {
                let (x_intercept, slope) = self.sample_line(rng);
                DarkeningCurve::Affine {
                    x_intercepts: vec![x_intercept; channels],
                    slopes: vec![slope; channels],
                }
            }
            InterceptsMode::AffineUnsync => {
                let (x_intercepts, slopes) = (0..channels).map(|_| self.sample_line(rng)).unzip();
                DarkeningCurve::Affine {
                    x_intercepts,
                    slopes,
                }
            }
            InterceptsMode::GammaCorrection => DarkeningCurve::Gamma {
                gamma: rng.gen_range(gamma_min..=gamma_max),
            },
        };

        let turbulence = (intercepts_mode == InterceptsMode::RandomJitter).then(|| Turbulence {
            mu: x_turb_mu,
            sigma: x_turb_sigma,
        });

        IlluminationParams { curve, turbulence }
    }

    /// Draws the intensity mapped to black and the resulting slope.
    fn sample_line<R>(&self, rng: &mut R) -> (f64, f64)
    where
        R: Rng,
    {
        let IlluminationConfig {
            xmin_at_y_0,
            xmax_at_y_0,
            ymin_at_x_255,
            ymax_at_x_255,
            slope_max,
            ..
        } = self.config;

        let x_intercept = rng.gen_range(xmin_at_y_0..=xmax_at_y_0);
        let y_at_max = rng.gen_range(ymin_at_x_255..=ymax_at_x_255);
        let slope = (y_at_max / (1.0 - x_intercept)).min(slope_max);
        (x_intercept, slope)
    }

    /// Darkens a CHW image with freshly drawn parameters.
    pub fn darken<R>(&self, xs: &Tensor, range: IntensityRange, rng: &mut R) -> Result<Tensor>
    where
        R: Rng,
    {
        let (channels, height, width) = xs.size3()?;
        let params = self.sample_params(channels as usize, rng);
        let noise = params
            .turbulence
            .map(|turbulence| {
                turbulence_noise(&[channels, height, width], turbulence, rng, xs.device())
            })
            .transpose()?;
        darken_with(xs, range, &params, noise.as_ref())
    }
}

/// Applies a drawn curve to a CHW image.
///
/// The output never exceeds the input and never goes below black.
pub fn darken_with(
    xs: &Tensor,
    range: IntensityRange,
    params: &IlluminationParams,
    noise: Option<&Tensor>,
) -> Result<Tensor> {
    let (channels, _height, _width) = xs.size3()?;
    let device = xs.device();
    let kind = xs.kind();
    let unit = range.to_unit(xs);

    let curved = match &params.curve {
        DarkeningCurve::Affine {
            x_intercepts,
            slopes,
        } => {
            ensure!(
                x_intercepts.len() == channels as usize && slopes.len() == channels as usize,
                "expect {} channel curves, but get {}",
                channels,
                x_intercepts.len()
            );
            let per_channel = |values: &[f64]| {
                let values: Vec<f32> = values.iter().map(|&val| val as f32).collect();
                Tensor::of_slice(&values)
                    .view([channels, 1, 1])
                    .to_kind(kind)
                    .to_device(device)
            };
            (&unit - per_channel(x_intercepts)) * per_channel(slopes)
        }
        DarkeningCurve::Gamma { gamma } => (unit.clamp_min(LOG_EPS).log() * *gamma).exp(),
    };

    let curved = match noise {
        Some(noise) => {
            ensure!(
                noise.size() == xs.size(),
                "turbulence shape {:?} does not match image shape {:?}",
                noise.size(),
                xs.size()
            );
            curved + noise
        }
        None => curved,
    };

    let darkened = range.from_unit(&curved.clamp_min(0.0).minimum(&unit));
    // the range round trip is inexact in f32, so bound by the input itself
    Ok(darkened.clamp_min(range.lower()).minimum(xs))
}

/// Per-element Gaussian jitter drawn from the given RNG.
pub fn turbulence_noise<R>(
    shape: &[i64],
    turbulence: Turbulence,
    rng: &mut R,
    device: Device,
) -> Result<Tensor>
where
    R: Rng,
{
    let Turbulence { mu, sigma } = turbulence;
    let numel = shape.iter().product::<i64>() as usize;

    let values: Vec<f32> = if sigma > 0.0 {
        let gaussian = Gaussian::new(mu, sigma)
            .map_err(|err| format_err!("invalid turbulence distribution: {:?}", err))?;
        Rv::<f32>::sample(&gaussian, numel, rng)
    } else {
        vec![mu as f32; numel]
    };

    Ok(Tensor::of_slice(&values).view(shape).to_device(device))
}
