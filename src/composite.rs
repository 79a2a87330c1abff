use crate::common::*;

/// Blends the darkened image into the target where the mask is set.
///
/// Computes `mask * darkened + (1 - mask) * target`. `target` and `darkened`
/// are CHW images of the same shape and `mask` is a broadcastable 1HW alpha map.
pub fn composite(target: &Tensor, mask: &Tensor, darkened: &Tensor) -> Result<Tensor> {
    let (channels, height, width) = target.size3()?;
    ensure!(
        darkened.size() == target.size(),
        "darkened image shape {:?} does not match target shape {:?}",
        darkened.size(),
        target.size()
    );

    let (mask_c, mask_h, mask_w) = mask.size3()?;
    ensure!(
        (mask_h, mask_w) == (height, width),
        "mask size {}x{} does not match image size {}x{}",
        mask_h,
        mask_w,
        height,
        width
    );
    ensure!(
        mask_c == 1 || mask_c == channels,
        "mask must have 1 or {} channels, but get {}",
        channels,
        mask_c
    );

    Ok(target + mask * (darkened - target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_diff(lhs: &Tensor, rhs: &Tensor) -> f64 {
        (lhs - rhs).abs().max().double_value(&[])
    }

    #[test]
    fn composite_extreme_masks() {
        let target = Tensor::rand(&[3, 8, 8], (Kind::Float, Device::Cpu));
        let darkened = &target * 0.3;

        let zeros = Tensor::zeros(&[1, 8, 8], (Kind::Float, Device::Cpu));
        let output = composite(&target, &zeros, &darkened).unwrap();
        assert_eq!(max_diff(&output, &target), 0.0);

        let ones = Tensor::ones(&[1, 8, 8], (Kind::Float, Device::Cpu));
        let output = composite(&target, &ones, &darkened).unwrap();
        assert!(max_diff(&output, &darkened) < 1e-6);
    }

    #[test]
    fn composite_blends_pointwise() {
        let target = Tensor::ones(&[3, 2, 2], (Kind::Float, Device::Cpu));
        let darkened = Tensor::zeros(&[3, 2, 2], (Kind::Float, Device::Cpu));
        let mask = Tensor::of_slice(&[0.0f32, 0.25, 0.5, 1.0]).view([1, 2, 2]);

        let output = composite(&target, &mask, &darkened).unwrap();
        assert_eq!(output.size(), [3, 2, 2]);

        let expect = Tensor::of_slice(&[1.0f32, 0.75, 0.5, 0.0])
            .view([1, 2, 2])
            .expand(&[3, 2, 2], false);
        assert!(max_diff(&output, &expect) < 1e-6);
    }

    #[test]
    fn composite_rejects_misaligned_inputs() {
        let target = Tensor::rand(&[3, 8, 8], (Kind::Float, Device::Cpu));
        let mask = Tensor::rand(&[1, 4, 8], (Kind::Float, Device::Cpu));
        assert!(composite(&target, &mask, &target).is_err());

        let mask = Tensor::rand(&[2, 8, 8], (Kind::Float, Device::Cpu));
        assert!(composite(&target, &mask, &target).is_err());

        let mask = Tensor::rand(&[1, 8, 8], (Kind::Float, Device::Cpu));
        let darkened = Tensor::rand(&[1, 8, 8], (Kind::Float, Device::Cpu));
        assert!(composite(&target, &mask, &darkened).is_err());
    }
}
