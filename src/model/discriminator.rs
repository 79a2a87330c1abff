use super::norm::{leaky_relu, NormConv2D, NormConv2DInit, NormSpec};
use crate::{
    common::*,
    config::{DiscriminatorConfig, ModelFamily},
    params,
};

// ceil((kernel - 1) / 2)
const PADDING: i64 = params::KERNEL_SIZE / 2;

/// Input channels of a PatchGAN discriminator for the given model family.
pub fn patch_input_channels(config: &DiscriminatorConfig) -> Result<i64> {
    let DiscriminatorConfig {
        model,
        input_nc,
        output_nc,
        use_precomp_mask_to_d,
        ..
    } = *config;

    let in_c = match model {
        ModelFamily::Pix2Pix | ModelFamily::Dhan => input_nc + output_nc,
        ModelFamily::Our => {
            if use_precomp_mask_to_d {
                output_nc + 1
            } else {
                output_nc
            }
        }
        ModelFamily::Argan => bail!("PatchGAN discriminator does not support the argan model"),
    };
    Ok(in_c)
}

/// Input channels of the global discriminator for the given model family.
pub fn global_input_channels(config: &DiscriminatorConfig) -> Result<i64> {
    let DiscriminatorConfig {
        model,
        input_nc,
        output_nc,
        ..
    } = *config;

    let in_c = match model {
        ModelFamily::Pix2Pix => input_nc + output_nc,
        ModelFamily::Argan | ModelFamily::Our => output_nc,
        ModelFamily::Dhan => bail!("global discriminator does not support the dhan model"),
    };
    Ok(in_c)
}

#[derive(Debug, Clone)]
pub struct PatchDiscriminatorInit {
    pub in_c: i64,
    pub ndf: i64,
    pub n_layers: usize,
    pub norm: NormSpec,
    pub get_intermediate_features: bool,
}

impl PatchDiscriminatorInit {
    pub fn new(in_c: i64) -> Self {
        Self {
            in_c,
            ndf: params::NDF,
            n_layers: params::N_LAYERS_D,
            norm: NormSpec::default(),
            get_intermediate_features: true,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<PatchDiscriminator>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            in_c,
            ndf,
            n_layers,
            norm,
            get_intermediate_features,
        } = self;
        ensure!(n_layers > 0, "n_layers_D must be positive");

        let conv_init = |in_c, out_c, stride, norm| NormConv2DInit {
            s: stride,
            p: PADDING,
            norm,
            ..NormConv2DInit::new(in_c, out_c, params::KERNEL_SIZE)
        };

        let mut blocks = Vec::with_capacity(n_layers + 1);
        blocks.push(PatchBlock {
            conv: conv_init(in_c, ndf, 2, NormSpec::none()).build(path / "model0"),
            activation: true,
        });

        let mut nf = ndf;
        for n in 1..n_layers {
            let nf_prev = nf;
            nf = (nf * 2).min(params::MAX_NF);
            let stride = if n == n_layers - 1 { 1 } else { 2 };
            blocks.push(PatchBlock {
                conv: conv_init(nf_prev, nf, stride, norm).build(path / format!("model{}", n)),
                activation: true,
            });
        }

        blocks.push(PatchBlock {
            conv: conv_init(nf, 1, 1, NormSpec::none())
                .build(path / format!("model{}", n_layers)),
            activation: false,
        });

        Ok(PatchDiscriminator {
            blocks,
            get_intermediate_features,
        })
    }
}

#[derive(Debug)]
struct PatchBlock {
    conv: NormConv2D,
    activation: bool,
}

/// A fully convolutional discriminator classifying local patches.
#[derive(Debug)]
pub struct PatchDiscriminator {
    blocks: Vec<PatchBlock>,
    get_intermediate_features: bool,
}

impl PatchDiscriminator {
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn get_intermediate_features(&self) -> bool {
        self.get_intermediate_features
    }

    /// Returns every block output, or only the final logit map if
    /// intermediate features are disabled.
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Vec<Tensor> {
        let mut outputs: Vec<Tensor> = Vec::with_capacity(self.blocks.len());

        for block in self.blocks.iter() {
            let xs = outputs.last().unwrap_or(input);
            let ys = block.conv.forward_t(xs, train);
            let ys = if block.activation {
                leaky_relu(&ys)
            } else {
                ys
            };
            outputs.push(ys);
        }

        if self.get_intermediate_features {
            outputs
        } else {
            outputs.split_off(outputs.len() - 1)
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalDiscriminatorInit {
    pub in_c: i64,
    pub ndf: i64,
    pub input_size: i64,
    pub norm: NormSpec,
}

impl GlobalDiscriminatorInit {
    pub fn build<'p, P>(self, path: P) -> Result<GlobalDiscriminator>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            in_c,
            ndf,
            input_size,
            norm,
        } = self;
        ensure!(input_size > 0, "input_size must be positive");

        let mut extractor = Vec::with_capacity(params::GLOBAL_D_LAYERS);
        let mut nf = ndf;
        let mut spatial = input_size;

        for n in 0..params::GLOBAL_D_LAYERS {
            let (nf_prev, layer_norm) = if n == 0 {
                (in_c, NormSpec::none())
            } else {
                let nf_prev = nf;
                nf = (nf * 2).min(params::MAX_NF);
                (nf_prev, norm)
            };

            let conv = NormConv2DInit {
                s: 2,
                p: PADDING,
                norm: layer_norm,
                ..NormConv2DInit::new(nf_prev, nf, params::KERNEL_SIZE)
            }
            .build(path / format!("extractor_{}", n));
            extractor.push(conv);

            spatial = conv_output_size(spatial, params::KERNEL_SIZE, 2, PADDING);
        }

        let in_features = nf * spatial * spatial;
        let classifier = nn::linear(path / "classifier", in_features, 1, Default::default());

        Ok(GlobalDiscriminator {
            extractor,
            classifier,
            in_features,
        })
    }
}

/// A discriminator producing a single logit per image.
#[derive(Debug)]
pub struct GlobalDiscriminator {
    extractor: Vec<NormConv2D>,
    classifier: nn::Linear,
    in_features: i64,
}

impl GlobalDiscriminator {
    pub fn in_features(&self) -> i64 {
        self.in_features
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let batch_size = input.size()[0];
        let features = self
            .extractor
            .iter()
            .fold(input.shallow_clone(), |xs, conv| {
                leaky_relu(&conv.forward_t(&xs, train))
            });
        features.view([batch_size, -1]).apply(&self.classifier)
    }
}

pub(crate) fn conv_output_size(size: i64, kernel: i64, stride: i64, padding: i64) -> i64 {
    (size + 2 * padding - kernel) / stride + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscriminatorKind;

    fn config(model: ModelFamily) -> DiscriminatorConfig {
        DiscriminatorConfig {
            kind: DiscriminatorKind::Multiscale {
                subarch: Default::default(),
                num_d: 2,
                n_layers_d: 4,
            },
            model,
            input_nc: 3,
            output_nc: 3,
            ndf: 8,
            norm_d: NormSpec::default(),
            use_precomp_mask_to_d: false,
            get_intermediate_features: true,
        }
    }

    #[test]
    fn input_channel_rules() {
        assert_eq!(patch_input_channels(&config(ModelFamily::Pix2Pix)).unwrap(), 6);
        assert_eq!(patch_input_channels(&config(ModelFamily::Dhan)).unwrap(), 6);
        assert_eq!(patch_input_channels(&config(ModelFamily::Our)).unwrap(), 3);
        assert!(patch_input_channels(&config(ModelFamily::Argan)).is_err());

        let with_mask = DiscriminatorConfig {
            use_precomp_mask_to_d: true,
            ..config(ModelFamily::Our)
        };
        assert_eq!(patch_input_channels(&with_mask).unwrap(), 4);

        assert_eq!(global_input_channels(&config(ModelFamily::Pix2Pix)).unwrap(), 6);
        assert_eq!(global_input_channels(&config(ModelFamily::Argan)).unwrap(), 3);
        assert_eq!(global_input_channels(&config(ModelFamily::Our)).unwrap(), 3);
        assert!(global_input_channels(&config(ModelFamily::Dhan)).is_err());
    }

    #[test]
    fn patch_discriminator_intermediate_features() {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let input = Tensor::randn(&[2, 3, 64, 64], (Kind::Float, Device::Cpu));

        let disc = PatchDiscriminatorInit {
            ndf: 8,
            ..PatchDiscriminatorInit::new(3)
        }
        .build(&root / "with_feats")
        .unwrap();
        assert_eq!(disc.num_blocks(), params::N_LAYERS_D + 1);

        let outputs = disc.forward_t(&input, true);
        assert_eq!(outputs.len(), params::N_LAYERS_D + 1);

        let channels: Vec<_> = outputs.iter().map(|xs| xs.size()[1]).collect();
        assert_eq!(channels, [8, 16, 32, 64, 1]);

        // 64 -> 33 -> 17 -> 9 -> 10 -> 11
        assert_eq!(outputs[0].size(), [2, 8, 33, 33]);
        assert_eq!(outputs[2].size(), [2, 32, 9, 9]);
        assert_eq!(outputs[4].size(), [2, 1, 11, 11]);

        let disc = PatchDiscriminatorInit {
            ndf: 8,
            get_intermediate_features: false,
            ..PatchDiscriminatorInit::new(3)
        }
        .build(&root / "final_only")
        .unwrap();
        let outputs = disc.forward_t(&input, false);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].size(), [2, 1, 11, 11]);
    }

    #[test]
    fn patch_discriminator_channel_cap() {
        let vs = nn::VarStore::new(Device::Cpu);
        let disc = PatchDiscriminatorInit {
            ndf: 256,
            n_layers: 3,
            norm: NormSpec::none(),
            get_intermediate_features: true,
            in_c: 1,
        }
        .build(&vs.root())
        .unwrap();

        let input = Tensor::randn(&[1, 1, 16, 16], (Kind::Float, Device::Cpu));
        let channels: Vec<_> = disc
            .forward_t(&input, false)
            .iter()
            .map(|xs| xs.size()[1])
            .collect();
        assert_eq!(channels, [256, 512, 512, 1]);
    }

    #[test]
    fn global_discriminator_logits() {
        let vs = nn::VarStore::new(Device::Cpu);
        let disc = GlobalDiscriminatorInit {
            in_c: 3,
            ndf: 64,
            input_size: 256,
            norm: "instance".parse().unwrap(),
        }
        .build(&vs.root())
        .unwrap();
        assert_eq!(disc.in_features(), 9 * 9 * 512);

        let vs = nn::VarStore::new(Device::Cpu);
        let disc = GlobalDiscriminatorInit {
            in_c: 3,
            ndf: 4,
            input_size: 32,
            norm: "instance".parse().unwrap(),
        }
        .build(&vs.root())
        .unwrap();

        let input = Tensor::randn(&[3, 3, 32, 32], (Kind::Float, Device::Cpu));
        let logits = disc.forward_t(&input, true);
        assert_eq!(logits.size(), [3, 1]);
    }
}
