use super::{
    discriminator::{PatchDiscriminator, PatchDiscriminatorInit},
    norm::NormSpec,
};
use crate::{common::*, config::Subarch, params};

/// Per-scale, per-layer discriminator activations.
///
/// `scales[i]` holds the outputs at the `i`-th scale, full resolution first.
/// The last tensor of each scale is always the final logit map.
#[derive(Debug, TensorLike)]
pub struct MultiscaleOutput {
    pub scales: Vec<Vec<Tensor>>,
}

impl MultiscaleOutput {
    pub fn num_scales(&self) -> usize {
        self.scales.len()
    }

    /// The final logit map of every scale.
    pub fn logits(&self) -> impl Iterator<Item = &Tensor> + '_ {
        self.scales.iter().filter_map(|layers| layers.last())
    }
}

#[derive(Debug, Clone)]
pub struct MultiscaleDiscriminatorInit {
    pub in_c: i64,
    pub subarch: Subarch,
    pub num_d: usize,
    pub n_layers_d: usize,
    pub ndf: i64,
    pub norm: NormSpec,
    pub get_intermediate_features: bool,
}

impl MultiscaleDiscriminatorInit {
    pub fn new(in_c: i64) -> Self {
        Self {
            in_c,
            subarch: Subarch::NLayer,
            num_d: params::NUM_D,
            n_layers_d: params::N_LAYERS_D,
            ndf: params::NDF,
            norm: NormSpec::default(),
            get_intermediate_features: true,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<MultiscaleDiscriminator>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            in_c,
            subarch,
            num_d,
            n_layers_d,
            ndf,
            norm,
            get_intermediate_features,
        } = self;
        ensure!(num_d > 0, "num_D must be positive");

        let discriminators = (0..num_d)
            .map(|index| {
                let subpath = path / format!("discriminator_{}", index);
                match subarch {
                    Subarch::NLayer => PatchDiscriminatorInit {
                        in_c,
                        ndf,
                        n_layers: n_layers_d,
                        norm,
                        get_intermediate_features,
                    }
                    .build(subpath),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MultiscaleDiscriminator { discriminators })
    }
}

/// An ensemble of patch discriminators evaluated on an image pyramid.
#[derive(Debug)]
pub struct MultiscaleDiscriminator {
    discriminators: Vec<PatchDiscriminator>,
}

impl MultiscaleDiscriminator {
    pub fn num_d(&self) -> usize {
        self.discriminators.len()
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> MultiscaleOutput {
        let num_d = self.discriminators.len();
        let mut input = input.shallow_clone();
        let mut scales = Vec::with_capacity(num_d);

        for (index, disc) in self.discriminators.iter().enumerate() {
            scales.push(disc.forward_t(&input, train));
            if index + 1 < num_d {
                input = downsample(&input);
            }
        }

        MultiscaleOutput { scales }
    }
}

/// Halves the spatial resolution with a 3x3 average pool.
///
/// Padded border elements are excluded from the average.
pub fn downsample(input: &Tensor) -> Tensor {
    let k = params::DOWNSAMPLE_KERNEL_SIZE;
    let s = params::DOWNSAMPLE_STRIDE;
    input.avg_pool2d(&[k, k], &[s, s], &[1, 1], false, false, None::<i64>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn downsample_excludes_padding() {
        let input = Tensor::ones(&[1, 1, 8, 8], (Kind::Float, Device::Cpu));
        let output = downsample(&input);
        assert_eq!(output.size(), [1, 1, 4, 4]);

        // a constant image stays constant only if padded zeros are ignored
        let min = output.min().double_value(&[]);
        let max = output.max().double_value(&[]);
        assert_abs_diff_eq!(min, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(max, 1.0, epsilon = 1e-6);

        // corner averages 2x2 real pixels
        let input = Tensor::of_slice(&[1f32, 2.0, 3.0, 4.0]).view([1, 1, 2, 2]);
        let output = downsample(&input);
        assert_eq!(output.size(), [1, 1, 1, 1]);
        assert_abs_diff_eq!(output.double_value(&[0, 0, 0, 0]), 2.5, epsilon = 1e-6);
    }

    #[test]
    fn multiscale_pyramid_resolutions() {
        let vs = nn::VarStore::new(Device::Cpu);
        let disc = MultiscaleDiscriminatorInit {
            num_d: 3,
            ndf: 4,
            ..MultiscaleDiscriminatorInit::new(3)
        }
        .build(&vs.root())
        .unwrap();
        assert_eq!(disc.num_d(), 3);

        let input = Tensor::randn(&[1, 3, 256, 256], (Kind::Float, Device::Cpu));
        let output = disc.forward_t(&input, false);
        assert_eq!(output.num_scales(), 3);

        // the first conv of each scale halves its input resolution
        let first_layer_sizes: Vec<_> = output
            .scales
            .iter()
            .map(|layers| {
                assert_eq!(layers.len(), params::N_LAYERS_D + 1);
                layers[0].size()[2]
            })
            .collect();
        assert_eq!(
            first_layer_sizes,
            [256 / 2 + 1, 128 / 2 + 1, 64 / 2 + 1]
        );
        assert_eq!(output.logits().count(), 3);
    }

    #[test]
    fn multiscale_wraps_final_output() {
        let vs = nn::VarStore::new(Device::Cpu);
        let disc = MultiscaleDiscriminatorInit {
            num_d: 2,
            ndf: 4,
            get_intermediate_features: false,
            ..MultiscaleDiscriminatorInit::new(6)
        }
        .build(&vs.root())
        .unwrap();

        let input = Tensor::randn(&[2, 6, 32, 32], (Kind::Float, Device::Cpu));
        let output = disc.forward_t(&input, true);
        assert_eq!(output.num_scales(), 2);
        for layers in output.scales.iter() {
            assert_eq!(layers.len(), 1);
            assert_eq!(layers[0].size()[1], 1);
        }
    }
}
