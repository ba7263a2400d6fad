use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use image::{imageops, RgbImage};
use std::{error::Error, path::Path};
use walkdir::WalkDir;

use crate::utils::{image_to_tensor, load_image};

// ////////////////////////////////////////////////////////////////////////////
// Dataset

/// High-resolution patches with their bicubic low-resolution counterparts.
#[derive(Debug, Clone)]
pub struct SrDataset {
    items: Vec<SrItem>,
}

impl SrDataset {
    /// Loads every image under `root`, center-crops a high-resolution patch
    /// of `patch_size * scale` and downsamples it by `scale` (`[x, y]`).
    /// Images too small for one patch are skipped.
    pub fn new<P: AsRef<Path>>(
        root: P,
        patch_size: usize,
        scale: [usize; 2],
    ) -> Result<Self, Box<dyn Error>> {
        let [sx, sy] = scale.map(|s| s as u32);
        let lr_size = patch_size as u32;
        let (hr_width, hr_height) = (lr_size * sx, lr_size * sy);

        let mut items = Vec::new();
        for entry in WalkDir::new(root.as_ref())
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
                continue;
            };
            if !matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "bmp") {
                continue;
            }

            let image = load_image(path)?;
            let (width, height) = image.dimensions();
            if width < hr_width || height < hr_height {
                log::warn!(
                    "skipping {}: {width}x{height} is smaller than a {hr_width}x{hr_height} patch",
                    path.display()
                );
                continue;
            }

            let left = (width - hr_width) / 2;
            let top = (height - hr_height) / 2;
            let hr = imageops::crop_imm(&image, left, top, hr_width, hr_height).to_image();
            let lr = imageops::resize(&hr, lr_size, lr_size, imageops::FilterType::CatmullRom);
            items.push(SrItem { lr, hr });
        }

        log::info!(
            "{} patches from {}",
            items.len(),
            root.as_ref().display()
        );
        Ok(Self { items })
    }
}

#[derive(Debug, Clone)]
pub struct SrItem {
    pub lr: RgbImage,
    pub hr: RgbImage,
}

impl Dataset<SrItem> for SrDataset {
    fn get(&self, index: usize) -> Option<SrItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Batcher

/// Images in `[0, 1]`, `[b, c, h, w]`.
#[derive(Debug, Clone)]
pub struct SrBatch<B: Backend> {
    pub lr: Tensor<B, 4>,
    pub hr: Tensor<B, 4>,
}

impl<B: Backend> SrBatch<B> {
    pub fn size(&self) -> usize {
        self.lr.dims()[0]
    }

    /// `(lr, hr)` of one image.
    pub fn get(&self, index: usize) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let lr = self.lr.clone().narrow(0, index, 1).squeeze(0);
        let hr = self.hr.clone().narrow(0, index, 1).squeeze(0);
        (lr, hr)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SrBatcher;

impl<B: Backend> Batcher<B, SrItem, SrBatch<B>> for SrBatcher {
    fn batch(&self, items: Vec<SrItem>, device: &B::Device) -> SrBatch<B> {
        let lr = items
            .iter()
            .map(|item| image_to_tensor::<B>(&item.lr, device).unsqueeze_dim(0))
            .collect::<Vec<_>>();

        let hr = items
            .iter()
            .map(|item| image_to_tensor::<B>(&item.hr, device).unsqueeze_dim(0))
            .collect::<Vec<_>>();

        SrBatch {
            lr: Tensor::cat(lr, 0),
            hr: Tensor::cat(hr, 0),
        }
    }
}
