// illumination model
pub const XMIN_AT_Y_0: f64 = 0.0;
pub const XMAX_AT_Y_0: f64 = 0.25;
pub const YMIN_AT_X_255: f64 = 0.1;
pub const YMAX_AT_X_255: f64 = 0.9;
pub const X_TURB_MU: f64 = 0.05;
pub const X_TURB_SIGMA: f64 = 0.025;
pub const SLOPE_MAX: f64 = 1.0;
pub const GAMMA_MIN: f64 = 1.2;
pub const GAMMA_MAX: f64 = 2.5;

// synthetic pair sampling
pub const MASK_BLUR_SIGMA: f32 = 5.0;
pub const PRECOMP_MASK_THRESH_MIN: f64 = 0.1;
pub const PRECOMP_MASK_THRESH_MAX: f64 = 0.9;

// geometric transforms
pub const LOAD_SIZE: usize = 286;
pub const CROP_SIZE: usize = 256;
pub const POWER_OF_2_BASE: usize = 32;

// discriminator
pub const NUM_D: usize = 2;
pub const N_LAYERS_D: usize = 4;
pub const NDF: i64 = 64;
pub const MAX_NF: i64 = 512;
pub const KERNEL_SIZE: i64 = 4;
pub const LEAKY_SLOPE: f64 = 0.2;
pub const GLOBAL_D_LAYERS: usize = 5;
pub const DOWNSAMPLE_KERNEL_SIZE: i64 = 3;
pub const DOWNSAMPLE_STRIDE: i64 = 2;

// normalization
pub const NORM_EPS: f64 = 1e-5;
pub const NORM_MOMENTUM: f64 = 0.1;
pub const SPECTRAL_EPS: f64 = 1e-12;
