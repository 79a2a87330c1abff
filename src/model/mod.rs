mod discriminator;
mod multiscale;
mod norm;

pub use discriminator::{
    global_input_channels, patch_input_channels, GlobalDiscriminator, GlobalDiscriminatorInit,
    PatchDiscriminator, PatchDiscriminatorInit,
};
pub use multiscale::{
    downsample, MultiscaleDiscriminator, MultiscaleDiscriminatorInit, MultiscaleOutput,
};
pub use norm::{leaky_relu, NormConv2D, NormConv2DInit, NormKind, NormSpec};

use crate::{
    common::*,
    config::{DiscriminatorConfig, DiscriminatorKind},
};

/// A discriminator built from [DiscriminatorConfig].
#[derive(Debug)]
pub enum Discriminator {
    Multiscale(MultiscaleDiscriminator),
    Global(GlobalDiscriminator),
}

impl Discriminator {
    pub fn from_config<'p, P>(path: P, config: &DiscriminatorConfig) -> Result<Self>
    where
        P: Borrow<nn::Path<'p>>,
    {
        config.validate()?;
        let path = path.borrow();

        let disc = match config.kind {
            DiscriminatorKind::Multiscale {
                subarch,
                num_d,
                n_layers_d,
            } => {
                let in_c = patch_input_channels(config)?;
                let disc = MultiscaleDiscriminatorInit {
                    in_c,
                    subarch,
                    num_d,
                    n_layers_d,
                    ndf: config.ndf,
                    norm: config.norm_d,
                    get_intermediate_features: config.get_intermediate_features,
                }
                .build(path / "multiscale")?;
                Self::Multiscale(disc)
            }
            DiscriminatorKind::Global { input_size } => {
                let in_c = global_input_channels(config)?;
                let disc = GlobalDiscriminatorInit {
                    in_c,
                    ndf: config.ndf,
                    input_size: input_size as i64,
                    norm: config.norm_d,
                }
                .build(path / "global")?;
                Self::Global(disc)
            }
        };

        Ok(disc)
    }

    /// Runs the discriminator. The global variant yields one scale with one logit tensor.
    pub fn forward_t(&self, input: &Tensor, train: bool) -> MultiscaleOutput {
        match self {
            Self::Multiscale(disc) => disc.forward_t(input, train),
            Self::Global(disc) => MultiscaleOutput {
                scales: vec![vec![disc.forward_t(input, train)]],
            },
        }
    }
}
