pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use derivative::Derivative;
pub use image::{
    imageops::FilterType, DynamicImage, GenericImageView, GrayImage, ImageBuffer, ImageFormat,
    Luma, Rgb, RgbImage,
};
pub use itertools::Itertools;
pub use log::{debug, error, info, warn};
pub use rand::{rngs::StdRng, Rng, SeedableRng};
pub use serde::{
    de::Error as DeserializeError, ser::Error as SerializeError, Deserialize, Deserializer,
    Serialize, Serializer,
};
pub use std::{
    borrow::Borrow,
    fmt::{self, Display},
    fs,
    iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
pub use tch::{
    nn::{self, Module, ModuleT},
    Device, Kind, Tensor,
};
pub use tch_tensor_like::TensorLike;

pub type Fallible<T> = Result<T, Error>;
