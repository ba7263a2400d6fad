use burn::{
    prelude::*,
    tensor::{cast::ToElement, module::conv2d, ops::ConvOptions},
};
use image::{imageops, ImageResult, Rgb, RgbImage};
use std::path::Path;

pub fn load_image<P: AsRef<Path>>(path: P) -> ImageResult<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}

/// `[3, h, w]` with values in `[0, 1]`.
pub fn image_to_tensor<B: Backend>(image: &RgbImage, device: &B::Device) -> Tensor<B, 3> {
    let (width, height) = image.dimensions();
    let values = image
        .as_raw()
        .iter()
        .map(|v| *v as f32 / 255.0)
        .collect::<Vec<_>>();

    Tensor::<B, 3>::from_data(
        TensorData::new(values, [height as usize, width as usize, 3]),
        device,
    )
    .permute([2, 0, 1])
}

/// Inverse of [`image_to_tensor`]; values outside `[0, 1]` are clipped.
pub fn tensor_to_image<B: Backend>(tensor: Tensor<B, 3>) -> RgbImage {
    let [_, height, width] = tensor.dims();
    let values = tensor
        .clamp(0.0, 1.0)
        .permute([1, 2, 0])
        .into_data()
        .iter::<f32>()
        .map(|v| (v * 255.0).round() as u8)
        .collect::<Vec<_>>();

    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let offset = (y as usize * width + x as usize) * 3;
        Rgb([values[offset], values[offset + 1], values[offset + 2]])
    })
}

/// Peak signal-to-noise ratio in dB between two tensors on the same range.
pub fn psnr<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    target: Tensor<B, D>,
    max_value: f32,
) -> f32 {
    let mse = (output - target).powf_scalar(2.0).mean().into_scalar().to_f32();
    if mse == 0.0 {
        return f32::INFINITY;
    }
    10.0 * (max_value * max_value / mse).log10()
}

const SSIM_WINDOW: usize = 11;
const SSIM_SIGMA: f32 = 1.5;

/// Normalized 1-d Gaussian taps.
fn gaussian_window(size: usize, sigma: f32) -> Vec<f32> {
    let center = (size as f32 - 1.0) / 2.0;
    let taps = (0..size)
        .map(|i| (-(i as f32 - center).powi(2) / (2.0 * sigma * sigma)).exp())
        .collect::<Vec<_>>();
    let total: f32 = taps.iter().sum();
    taps.into_iter().map(|t| t / total).collect()
}

/// Mean structural similarity of two `[b, c, h, w]` batches on the same
/// range, with an 11x11 Gaussian window (shrunk for smaller images) and no
/// padding.
pub fn ssim<B: Backend>(output: Tensor<B, 4>, target: Tensor<B, 4>, max_value: f32) -> f32 {
    let [_, channels, height, width] = output.dims();
    let size = SSIM_WINDOW.min(height).min(width).max(1);
    let taps = gaussian_window(size, SSIM_SIGMA);
    let window = taps
        .iter()
        .flat_map(|row| taps.iter().map(move |col| row * col))
        .collect::<Vec<_>>();

    let device = output.device();
    let weight = Tensor::<B, 4>::from_data(TensorData::new(window, [1, 1, size, size]), &device)
        .repeat_dim(0, channels);
    let filter = |x: Tensor<B, 4>| {
        conv2d(
            x,
            weight.clone(),
            None,
            ConvOptions::new([1, 1], [0, 0], [1, 1], channels),
        )
    };

    let c1 = (0.01 * max_value).powi(2);
    let c2 = (0.03 * max_value).powi(2);

    let mu_x = filter(output.clone());
    let mu_y = filter(target.clone());
    let mu_xx = mu_x.clone().powf_scalar(2.0);
    let mu_yy = mu_y.clone().powf_scalar(2.0);
    let mu_xy = mu_x * mu_y;
    let sigma_xx = filter(output.clone().powf_scalar(2.0)) - mu_xx.clone();
    let sigma_yy = filter(target.clone().powf_scalar(2.0)) - mu_yy.clone();
    let sigma_xy = filter(output * target) - mu_xy.clone();

    let numerator = mu_xy.mul_scalar(2.0).add_scalar(c1) * sigma_xy.mul_scalar(2.0).add_scalar(c2);
    let denominator = (mu_xx + mu_yy).add_scalar(c1) * (sigma_xx + sigma_yy).add_scalar(c2);
    (numerator / denominator).mean().into_scalar().to_f32()
}

/// Writes `(lr, sr, hr)` triplets as rows of a mosaic. Low-resolution
/// inputs are blown up with nearest-neighbour to the size of the output.
pub fn save_mosaic<P: AsRef<Path>>(
    rows: &[(RgbImage, RgbImage, RgbImage)],
    path: P,
) -> ImageResult<()> {
    let (tile_width, tile_height) = rows
        .first()
        .map(|(_, _, hr)| hr.dimensions())
        .unwrap_or((0, 0));

    let mut mosaic = RgbImage::new(tile_width * 3, tile_height * rows.len() as u32);
    for (row, (lr, sr, hr)) in rows.iter().enumerate() {
        let lr = imageops::resize(lr, tile_width, tile_height, imageops::FilterType::Nearest);
        let top = row as i64 * tile_height as i64;
        for (col, tile) in [&lr, sr, hr].into_iter().enumerate() {
            imageops::replace(&mut mosaic, tile, col as i64 * tile_width as i64, top);
        }
    }
    mosaic.save(path)
}
