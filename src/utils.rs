use crate::common::*;

pub fn open_rgb<P>(path: P) -> Result<DynamicImage>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let image = image::open(path)
        .with_context(|| format!("unable to decode image {}", path.display()))?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

pub fn open_gray<P>(path: P) -> Result<DynamicImage>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let image = image::open(path)
        .with_context(|| format!("unable to decode image {}", path.display()))?;
    Ok(DynamicImage::ImageLuma8(image.to_luma8()))
}

/// Converts an 8-bit image to a CHW float tensor in [0, 1].
///
/// Grayscale images give one channel, everything else is converted to RGB.
pub fn image_to_tensor(image: &DynamicImage) -> Tensor {
    let (width, height) = image.dimensions();

    match image {
        DynamicImage::ImageLuma8(gray) => raw_to_tensor(gray.as_raw(), height, width, 1),
        _ => raw_to_tensor(image.to_rgb8().as_raw(), height, width, 3),
    }
}

fn raw_to_tensor(raw: &[u8], height: u32, width: u32, channels: i64) -> Tensor {
    Tensor::of_slice(raw)
        .view([height as i64, width as i64, channels])
        .permute(&[2, 0, 1]) // channel last to channel first
        .to_kind(Kind::Float)
        / 255.0
}

/// Converts a CHW tensor in [0, 1] with 1 or 3 channels back to an 8-bit image.
pub fn tensor_to_image(tensor: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = tensor.size3()?;
    let bytes = (tensor.clamp(0.0, 1.0) * 255.0)
        .round()
        .to_kind(Kind::Uint8)
        .permute(&[1, 2, 0])
        .contiguous()
        .to_device(Device::Cpu);

    let numel = (channels * height * width) as usize;
    let mut buf = vec![0u8; numel];
    bytes.copy_data(&mut buf, numel);

    let (width, height) = (width as u32, height as u32);
    let image = match channels {
        1 => GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
        _ => bail!("cannot convert a {}-channel tensor to an image", channels),
    };
    image.ok_or_else(|| format_err!("image buffer size mismatch"))
}
