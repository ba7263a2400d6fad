use std::{fmt, path::PathBuf, str::FromStr};

use burn::{
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder, RecorderError},
    tensor::activation::relu,
};

use crate::error::{ConfigError, Result};

/// Convolutions per block and their width.
const BLOCKS: [(usize, usize); 5] = [(2, 64), (2, 128), (4, 256), (4, 512), (4, 512)];

/// A VGG-19 layer addressed the Keras way: `block2_conv2`, `block3_pool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureLayer {
    block: usize,
    /// `None` selects the block's pooling output.
    conv: Option<usize>,
}

impl FeatureLayer {
    /// Convolutions kept per block up to this layer.
    fn convs_per_block(&self) -> Vec<usize> {
        (1..=self.block)
            .map(|block| match self.conv {
                Some(conv) if block == self.block => conv,
                _ => BLOCKS[block - 1].0,
            })
            .collect()
    }

    fn channels(&self) -> usize {
        BLOCKS[self.block - 1].1
    }
}

impl fmt::Display for FeatureLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.conv {
            Some(conv) => write!(f, "block{}_conv{conv}", self.block),
            None => write!(f, "block{}_pool", self.block),
        }
    }
}

impl FromStr for FeatureLayer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigError::UnknownFeatureLayer(s.to_string());

        let (block, layer) = s
            .strip_prefix("block")
            .and_then(|rest| rest.split_once('_'))
            .ok_or_else(unknown)?;
        let block: usize = block.parse().map_err(|_| unknown())?;
        if !(1..=BLOCKS.len()).contains(&block) {
            return Err(unknown());
        }

        let conv = match layer {
            "pool" => None,
            _ => {
                let conv: usize = layer
                    .strip_prefix("conv")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(unknown)?;
                if !(1..=BLOCKS[block - 1].0).contains(&conv) {
                    return Err(unknown());
                }
                Some(conv)
            }
        };

        Ok(Self { block, conv })
    }
}

/// VGG-19 convolutional trunk truncated at a feature layer.
#[derive(Module, Debug)]
pub struct Vgg19<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    layer: Ignored<FeatureLayer>,
}

impl<B: Backend> Vgg19<B> {
    pub fn new(layer: FeatureLayer, device: &B::Device) -> Self {
        let mut convs = Vec::new();
        let mut channels = 3;
        for (count, (_, width)) in layer.convs_per_block().into_iter().zip(BLOCKS) {
            for _ in 0..count {
                convs.push(
                    Conv2dConfig::new([channels, width], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                );
                channels = width;
            }
        }
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            convs,
            pool,
            layer: Ignored(layer),
        }
    }

    /// Loads weights exported with this module's record layout. Records of
    /// a deeper network are cut to the convolutions this trunk keeps; a
    /// shallower record is an error.
    pub fn load(self, path: impl Into<PathBuf>, device: &B::Device) -> Result<Self, RecorderError> {
        let path = path.into();
        let mut record: Vgg19Record<B> =
            NamedMpkFileRecorder::<FullPrecisionSettings>::new().load(path.clone(), device)?;

        let needed = self.convs.len();
        if record.convs.len() < needed {
            return Err(RecorderError::Unknown(format!(
                "{} holds {} convolutions, {} needs {needed}",
                path.display(),
                record.convs.len(),
                self.layer.0,
            )));
        }
        record.convs.truncate(needed);

        log::info!("loaded VGG-19 weights from {}", path.display());
        Ok(self.load_record(record))
    }

    pub fn layer(&self) -> FeatureLayer {
        self.layer.0
    }

    pub fn out_channels(&self) -> usize {
        self.layer.0.channels()
    }

    /// Features of an ImageNet-normalized batch at the configured layer.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let layer = self.layer.0;
        let mut convs = self.convs.iter();
        let mut x = input;

        for (block, count) in layer.convs_per_block().into_iter().enumerate() {
            for conv in convs.by_ref().take(count) {
                x = relu(conv.forward(x));
            }
            if block + 1 < layer.block || layer.conv.is_none() {
                x = self.pool.forward(x);
            }
        }
        x
    }
}

/// Maps images in `[-1, 1]` to the ImageNet statistics VGG was trained on.
pub fn imagenet_norm<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = &input.device();
    let scaled = (input + 1.0) / 2.0;
    let mean = Tensor::<B, 1>::from_floats([0.485, 0.456, 0.406], device).reshape([1, 3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats([0.229, 0.224, 0.225], device).reshape([1, 3, 1, 1]);

    (scaled - mean) / std
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};
    use rstest::rstest;

    type TestBackend = NdArray<f32>;

    #[rstest]
    #[case("block1_conv1", 1, Some(1))]
    #[case("block2_conv2", 2, Some(2))]
    #[case("block5_conv4", 5, Some(4))]
    #[case("block3_pool", 3, None)]
    fn parses_keras_names(#[case] name: &str, #[case] block: usize, #[case] conv: Option<usize>) {
        assert_eq!(name.parse::<FeatureLayer>(), Ok(FeatureLayer { block, conv }));
    }

    #[rstest]
    #[case("block6_conv1")]
    #[case("block1_conv3")]
    #[case("block0_pool")]
    #[case("fc1")]
    #[case("block2conv1")]
    fn rejects_unknown_layers(#[case] name: &str) {
        assert_eq!(
            name.parse::<FeatureLayer>(),
            Err(ConfigError::UnknownFeatureLayer(name.to_string()))
        );
    }

    #[rstest]
    #[case("block1_conv2", [1, 64, 16, 16], 2)]
    #[case("block2_conv2", [1, 128, 8, 8], 4)]
    #[case("block3_pool", [1, 256, 2, 2], 8)]
    fn truncates_at_the_layer(
        #[case] name: &str,
        #[case] dims: [usize; 4],
        #[case] convs: usize,
    ) {
        let device = Default::default();
        let vgg = Vgg19::<TestBackend>::new(name.parse().unwrap(), &device);
        assert_eq!(vgg.convs.len(), convs);
        assert_eq!(vgg.out_channels(), dims[1]);

        let input = Tensor::<TestBackend, 4>::random([1, 3, 16, 16], Distribution::Default, &device);
        assert_eq!(vgg.forward(input).dims(), dims);
    }

    #[test]
    fn loads_weights_from_a_deeper_record() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg19");

        let deep = Vgg19::<TestBackend>::new("block2_conv2".parse().unwrap(), &device);
        NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .record(deep.clone().into_record(), path.clone())
            .unwrap();

        let shallow = Vgg19::<TestBackend>::new("block1_conv2".parse().unwrap(), &device)
            .load(path, &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::random([1, 3, 8, 8], Distribution::Default, &device);
        let expected = relu(deep.convs[1].forward(relu(deep.convs[0].forward(input.clone()))));
        let diff = (shallow.forward(input) - expected).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn shallower_record_is_an_error() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg19");

        let shallow = Vgg19::<TestBackend>::new("block1_conv2".parse().unwrap(), &device);
        NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .record(shallow.into_record(), path.clone())
            .unwrap();

        let result = Vgg19::<TestBackend>::new("block2_conv2".parse().unwrap(), &device).load(path, &device);
        assert!(matches!(result, Err(RecorderError::Unknown(_))));
    }

    #[test]
    fn layer_names_round_trip_through_display() {
        for name in ["block1_conv1", "block4_conv3", "block5_pool"] {
            assert_eq!(name.parse::<FeatureLayer>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn imagenet_norm_maps_the_mean_to_zero() {
        let device = Default::default();
        let mean = Tensor::<TestBackend, 1>::from_floats([0.485, 0.456, 0.406], &device)
            .reshape([1, 3, 1, 1])
            .mul_scalar(2.0)
            .sub_scalar(1.0);

        let normalized = imagenet_norm(mean);
        assert!(normalized.abs().max().into_scalar() < 1e-5);
    }
}
