use crate::{common::*, params};

/// The normalization applied around a discriminator convolution.
///
/// Written as a single string such as `spectralinstance`, `batch` or `none`.
/// The optional `spectral` prefix wraps the convolution weight with spectral
/// normalization, and the remainder picks the layer normalizing the conv output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormSpec {
    pub spectral: bool,
    pub kind: NormKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormKind {
    Instance,
    Batch,
    None,
}

impl NormSpec {
    pub fn none() -> Self {
        Self {
            spectral: false,
            kind: NormKind::None,
        }
    }

    /// Returns true if the conv output goes through a normalization layer.
    pub fn has_layer_norm(&self) -> bool {
        self.kind != NormKind::None
    }
}

impl Default for NormSpec {
    fn default() -> Self {
        Self {
            spectral: true,
            kind: NormKind::Instance,
        }
    }
}

impl FromStr for NormSpec {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (spectral, subnorm) = match text.strip_prefix("spectral") {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let kind = match subnorm {
            "instance" => NormKind::Instance,
            "batch" | "syncbatch" => NormKind::Batch,
            "none" | "" => NormKind::None,
            _ => bail!("normalization layer {} is not recognized", text),
        };
        Ok(Self { spectral, kind })
    }
}

impl TryFrom<String> for NormSpec {
    type Error = Error;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<NormSpec> for String {
    fn from(spec: NormSpec) -> Self {
        format!("{}", spec)
    }
}

impl Display for NormSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.spectral {
            write!(f, "spectral")?;
        }
        let subnorm = match self.kind {
            NormKind::Instance => "instance",
            NormKind::Batch => "batch",
            NormKind::None => "none",
        };
        write!(f, "{}", subnorm)
    }
}

pub fn leaky_relu(xs: &Tensor) -> Tensor {
    xs.maximum(&(xs * params::LEAKY_SLOPE))
}

#[derive(Debug, Clone)]
pub struct NormConv2DInit {
    pub in_c: i64,
    pub out_c: i64,
    pub k: i64,
    pub s: i64,
    pub p: i64,
    pub norm: NormSpec,
}

impl NormConv2DInit {
    pub fn new(in_c: i64, out_c: i64, k: i64) -> Self {
        Self {
            in_c,
            out_c,
            k,
            s: 1,
            p: k / 2,
            norm: NormSpec::none(),
        }
    }

    pub fn build<'p, P>(self, path: P) -> NormConv2D
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let device = path.device();

        let Self {
            in_c,
            out_c,
            k,
            s,
            p,
            norm,
        } = self;

        let ws = path.var("weight", &[out_c, in_c, k, k], nn::Init::KaimingUniform);
        // bias is redundant before a normalization layer
        let bs = if norm.has_layer_norm() {
            None
        } else {
            Some(path.var("bias", &[out_c], nn::Init::Const(0.0)))
        };

        let spectral_u = norm.spectral.then(|| {
            let mut u = path.zeros_no_train("weight_u", &[out_c]);
            tch::no_grad(|| {
                let init = Tensor::randn(&[out_c], (Kind::Float, device));
                u.copy_(&l2_normalize(&init));
            });
            u
        });

        let layer_norm = match norm.kind {
            NormKind::Instance => Some(LayerNorm::Instance),
            NormKind::Batch => Some(LayerNorm::Batch(nn::batch_norm2d(
                path / "norm",
                out_c,
                Default::default(),
            ))),
            NormKind::None => None,
        };

        NormConv2D {
            ws,
            bs,
            spectral_u,
            layer_norm,
            stride: s,
            padding: p,
        }
    }
}

#[derive(Debug)]
enum LayerNorm {
    Instance,
    Batch(nn::BatchNorm),
}

/// A 2D convolution with optional spectral weight normalization and output normalization.
#[derive(Debug)]
pub struct NormConv2D {
    ws: Tensor,
    bs: Option<Tensor>,
    spectral_u: Option<Tensor>,
    layer_norm: Option<LayerNorm>,
    stride: i64,
    padding: i64,
}

impl NormConv2D {
    pub fn has_bias(&self) -> bool {
        self.bs.is_some()
    }

    /// The convolution weight actually applied in the forward pass.
    ///
    /// With spectral normalization, one power iteration step refines the
    /// stored singular vector in training mode.
    pub fn effective_weight(&self, train: bool) -> Tensor {
        let u_buf = match &self.spectral_u {
            Some(u) => u,
            None => return self.ws.shallow_clone(),
        };

        let out_c = self.ws.size()[0];
        let w_mat = self.ws.view([out_c, -1]);

        let (u, v) = tch::no_grad(|| {
            let v = l2_normalize(&w_mat.transpose(0, 1).mv(u_buf));
            if train {
                let mut u_buf = u_buf.shallow_clone();
                u_buf.copy_(&l2_normalize(&w_mat.mv(&v)));
            }
            (u_buf.copy(), v)
        });

        let sigma = u.dot(&w_mat.mv(&v));
        &self.ws / sigma
    }
}

impl nn::ModuleT for NormConv2D {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let weight = self.effective_weight(train);
        let xs = xs.conv2d(
            &weight,
            self.bs.as_ref(),
            &[self.stride, self.stride],
            &[self.padding, self.padding],
            &[1, 1],
            1,
        );

        match &self.layer_norm {
            Some(LayerNorm::Instance) => Tensor::instance_norm(
                &xs,
                None::<&Tensor>,
                None::<&Tensor>,
                None::<&Tensor>,
                None::<&Tensor>,
                true,
                params::NORM_MOMENTUM,
                params::NORM_EPS,
                false,
            ),
            Some(LayerNorm::Batch(bn)) => bn.forward_t(&xs, train),
            None => xs,
        }
    }
}

fn l2_normalize(xs: &Tensor) -> Tensor {
    xs / (xs.norm() + params::SPECTRAL_EPS)
}
