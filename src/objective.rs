use crate::{common::*, model::MultiscaleOutput};

/// The hinge loss of the discriminator, averaged over scales.
pub fn hinge_loss_d(real: &MultiscaleOutput, fake: &MultiscaleOutput) -> Result<Tensor> {
    ensure!(
        real.num_scales() == fake.num_scales() && real.num_scales() > 0,
        "real and fake outputs must have the same non-zero number of scales"
    );

    let num_scales = real.num_scales() as f64;
    let loss = real
        .logits()
        .zip_eq(fake.logits())
        .map(|(real, fake)| {
            (1.0f64 - real).relu().mean(Kind::Float) + (1.0f64 + fake).relu().mean(Kind::Float)
        })
        .fold1(|lhs, rhs| lhs + rhs)
        .ok_or_else(|| format_err!("no logits"))?;

    Ok(loss / num_scales)
}

/// The hinge loss of the generator, averaged over scales.
pub fn hinge_loss_g(fake: &MultiscaleOutput) -> Result<Tensor> {
    let num_scales = fake.num_scales() as f64;
    let loss = fake
        .logits()
        .map(|fake| -fake.mean(Kind::Float))
        .fold1(|lhs, rhs| lhs + rhs)
        .ok_or_else(|| format_err!("no logits"))?;
    Ok(loss / num_scales)
}

/// The L1 distance of intermediate activations, scaled by `lambda`.
///
/// Every layer but the final logit map contributes. Layer terms are summed
/// within a scale and averaged over scales. Gradients never flow into `real`.
pub fn feature_matching_loss(
    fake: &MultiscaleOutput,
    real: &MultiscaleOutput,
    lambda: f64,
) -> Result<Tensor> {
    ensure!(
        fake.num_scales() == real.num_scales() && fake.num_scales() > 0,
        "real and fake outputs must have the same non-zero number of scales"
    );

    let mut terms = vec![];
    for (fake_layers, real_layers) in fake.scales.iter().zip(&real.scales) {
        ensure!(
            fake_layers.len() == real_layers.len(),
            "real and fake outputs must have the same number of layers"
        );
        ensure!(
            fake_layers.len() > 1,
            "feature matching requires intermediate features"
        );

        let num_layers = fake_layers.len() - 1;
        terms.extend(
            fake_layers[..num_layers]
                .iter()
                .zip(&real_layers[..num_layers])
                .map(|(fake, real)| (fake - real.detach()).abs().mean(Kind::Float)),
        );
    }

    let num_scales = fake.num_scales() as f64;
    let loss = terms
        .into_iter()
        .fold1(|lhs, rhs| lhs + rhs)
        .ok_or_else(|| format_err!("no intermediate features"))?;
    Ok(loss * lambda / num_scales)
}
