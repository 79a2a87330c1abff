//! Geometric preprocessing shared by targets and masks.

use crate::{
    common::*,
    config::{PreprocessMode, TransformConfig},
    params, utils,
};

/// Random choices of one transform, drawn once per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformParams {
    pub crop_pos: (u32, u32),
    pub flip: bool,
}

impl TransformParams {
    /// Draws the crop position and flip for an image of `(width, height)`.
    pub fn sample<R>(config: &TransformConfig, size: (u32, u32), rng: &mut R) -> Self
    where
        R: Rng,
    {
        let (width, height) = size;
        let load_size = config.load_size as u32;
        let crop_size = config.crop_size as u32;

        let (new_w, new_h) = match config.preprocess_mode {
            PreprocessMode::ResizeAndCrop => (load_size, load_size),
            PreprocessMode::ScaleWidthAndCrop => (load_size, rescale(height, load_size, width)),
            PreprocessMode::ScaleShortsideAndCrop => {
                let long = rescale(width.max(height), load_size, width.min(height));
                if width <= height {
                    (load_size, long)
                } else {
                    (long, load_size)
                }
            }
            _ => (width, height),
        };

        let x = rng.gen_range(0..=new_w.saturating_sub(crop_size));
        let y = rng.gen_range(0..=new_h.saturating_sub(crop_size));
        let flip = rng.gen::<f64>() > 0.5;

        Self {
            crop_pos: (x, y),
            flip,
        }
    }
}

/// Whether an image is a color image or a single-channel matte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Rgb,
    Gray,
}

/// A resolved transform: fixed operations plus drawn parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    mode: PreprocessMode,
    load_size: u32,
    crop_size: u32,
    crop_pos: (u32, u32),
    flip: bool,
    normalize: bool,
}

impl Transform {
    pub fn new(config: &TransformConfig, params: &TransformParams, kind: ImageKind) -> Self {
        Self {
            mode: config.preprocess_mode,
            load_size: config.load_size as u32,
            crop_size: config.crop_size as u32,
            crop_pos: params.crop_pos,
            flip: config.flip && params.flip,
            normalize: config.normalize && kind == ImageKind::Rgb,
        }
    }

    /// Returns true if the produced tensor lies in [-1, 1] rather than [0, 1].
    pub fn normalizes(&self) -> bool {
        self.normalize
    }

    pub fn apply_image(&self, image: &DynamicImage) -> DynamicImage {
        let filter = FilterType::CatmullRom;
        let load_size = self.load_size;

        let image = match self.mode {
            PreprocessMode::ResizeAndCrop => image.resize_exact(load_size, load_size, filter),
            PreprocessMode::ScaleWidth | PreprocessMode::ScaleWidthAndCrop => {
                scale_width(image, load_size, filter)
            }
            PreprocessMode::ScaleShortside | PreprocessMode::ScaleShortsideAndCrop => {
                scale_shortside(image, load_size, filter)
            }
            PreprocessMode::Crop | PreprocessMode::None => image.clone(),
        };

        let image = if self.mode.crops() {
            let (x, y) = self.crop_pos;
            crop_padded(&image, x, y, self.crop_size)
        } else {
            image
        };

        let image = if self.mode == PreprocessMode::None {
            make_power_2(&image, params::POWER_OF_2_BASE as u32, filter)
        } else {
            image
        };

        if self.flip {
            image.fliph()
        } else {
            image
        }
    }

    pub fn to_tensor(&self, image: &DynamicImage) -> Tensor {
        let tensor = utils::image_to_tensor(image);
        if self.normalize {
            tensor * 2.0 - 1.0
        } else {
            tensor
        }
    }

    pub fn apply(&self, image: &DynamicImage) -> Tensor {
        self.to_tensor(&self.apply_image(image))
    }
}

/// Scales `side` by `target / reference`.
fn rescale(side: u32, target: u32, reference: u32) -> u32 {
    let scaled = target as u64 * side as u64 / reference.max(1) as u64;
    scaled.clamp(1, u32::MAX as u64) as u32
}

/// Crops a square window, padding with black where it leaves the image.
fn crop_padded(image: &DynamicImage, x: u32, y: u32, size: u32) -> DynamicImage {
    let cropped = image.crop_imm(x, y, size, size);
    if cropped.dimensions() == (size, size) {
        return cropped;
    }

    let mut canvas = match image {
        DynamicImage::ImageLuma8(_) => DynamicImage::new_luma8(size, size),
        _ => DynamicImage::new_rgb8(size, size),
    };
    image::imageops::replace(&mut canvas, &cropped, 0, 0);
    canvas
}

fn scale_width(image: &DynamicImage, target_width: u32, filter: FilterType) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width == target_width {
        return image.clone();
    }
    image.resize_exact(target_width, rescale(height, target_width, width), filter)
}

fn scale_shortside(image: &DynamicImage, target_size: u32, filter: FilterType) -> DynamicImage {
    let (width, height) = image.dimensions();
    let short = width.min(height);
    if short == target_size {
        return image.clone();
    }
    image.resize_exact(
        rescale(width, target_size, short),
        rescale(height, target_size, short),
        filter,
    )
}

fn make_power_2(image: &DynamicImage, base: u32, filter: FilterType) -> DynamicImage {
    let (width, height) = image.dimensions();
    let round = |side: u32| (((side as f64 / base as f64).round() as u32) * base).max(base);
    let (new_w, new_h) = (round(width), round(height));
    if (new_w, new_h) == (width, height) {
        return image.clone();
    }
    image.resize_exact(new_w, new_h, filter)
}
